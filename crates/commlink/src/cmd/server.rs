use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use commlink_endpoint::{Endpoint, TcpServerConfig, TcpServerEndpoint};

use crate::cmd::session::{self, Inbox};
use crate::cmd::ServerArgs;
use crate::exit::{endpoint_error, CliResult, SUCCESS};
use crate::logging;
use crate::output::OutputFormat;

pub fn run(args: ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = TcpServerConfig::new(args.port).with_bind_address(args.bind);
    config.framing = args.framing.framing();

    let server = TcpServerEndpoint::new(config);
    let span = logging::endpoint_span("server", &server.identity());
    let _entered = span.clone().entered();
    let inbox = Inbox::subscribe(server.events(), false);
    server.events().on_peers_changed(move |peers| {
        span.in_scope(|| tracing::info!(count = peers.len(), peers = ?peers, "peer set changed"));
    });

    let running = Arc::new(AtomicBool::new(true));
    session::install_ctrlc_handler(running.clone())?;

    server
        .open()
        .map_err(|err| endpoint_error("listen failed", err))?;

    inbox.run(&running, args.count, 0, format, |event| {
        if !args.echo {
            return;
        }
        let Some(source) = event.source.as_deref() else {
            return;
        };
        if let Err(err) = server.send_to(source, &event.payload) {
            tracing::warn!(peer = source, error = %err, "echo failed");
        }
    });

    server.close();
    Ok(SUCCESS)
}
