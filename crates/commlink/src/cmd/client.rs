use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use commlink_endpoint::{Endpoint, TcpClientConfig, TcpClientEndpoint};
use commlink_transport::{AlwaysReachable, IcmpProbe, ReachabilityProbe};

use crate::cmd::session::{self, Inbox};
use crate::cmd::ClientArgs;
use crate::exit::{endpoint_error, CliError, CliResult, TIMEOUT};
use crate::logging;
use crate::output::OutputFormat;

pub fn run(args: ClientArgs, format: OutputFormat) -> CliResult<i32> {
    let client = build_client(&args)?;
    let span = logging::endpoint_span("client", &client.identity());
    let _entered = span.clone().entered();
    let inbox = Inbox::subscribe(client.events(), args.exchange.sync);
    client.events().on_state_changed(move |connected| {
        span.in_scope(|| tracing::info!(connected, "link state changed"));
    });

    let running = Arc::new(AtomicBool::new(true));
    session::install_ctrlc_handler(running.clone())?;

    client
        .open()
        .map_err(|err| endpoint_error("open failed", err))?;

    let connect_timeout = session::parse_duration(&args.connect_timeout)?;
    if !session::wait_connected(&client, connect_timeout, &running) {
        client.close();
        return Err(CliError::new(
            TIMEOUT,
            format!(
                "not connected to {} within {}ms",
                args.remote,
                connect_timeout.as_millis()
            ),
        ));
    }

    if let Some(heartbeat) = &args.heartbeat {
        client.set_heartbeat_interval(session::parse_duration(&args.heartbeat_interval)?);
        client
            .start_heartbeat(session::parse_hex(heartbeat)?)
            .map_err(|err| endpoint_error("heartbeat failed", err))?;
    }

    let result = session::exchange(
        &client,
        &inbox,
        &args.exchange,
        &args.framing,
        &running,
        format,
    );
    client.close();
    result
}

fn build_client(args: &ClientArgs) -> CliResult<TcpClientEndpoint> {
    let mut config = TcpClientConfig::new(args.remote)
        .with_local_port(args.local_port)
        .with_reconnect_interval(session::parse_duration(&args.reconnect_interval)?);
    config.framing = args.framing.framing();

    let probe: Arc<dyn ReachabilityProbe> = if args.no_probe {
        Arc::new(AlwaysReachable)
    } else {
        Arc::new(IcmpProbe)
    };
    Ok(TcpClientEndpoint::with_probe(config, probe))
}
