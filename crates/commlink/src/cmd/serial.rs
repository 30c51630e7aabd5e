use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use commlink_endpoint::{Endpoint, SerialConfig, SerialEndpoint};
use commlink_transport::{Parity, StopBits};

use crate::cmd::session::{self, Inbox};
use crate::cmd::{ParityArg, SerialArgs, StopBitsArg};
use crate::exit::{endpoint_error, CliResult};
use crate::logging;
use crate::output::OutputFormat;

pub fn run(args: SerialArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = SerialEndpoint::new(config_from(&args));
    let span = logging::endpoint_span("serial", &endpoint.identity());
    let _entered = span.clone().entered();
    let inbox = Inbox::subscribe(endpoint.events(), args.exchange.sync);
    endpoint.events().on_state_changed(move |connected| {
        span.in_scope(|| tracing::info!(connected, "line state changed"));
    });

    let running = Arc::new(AtomicBool::new(true));
    session::install_ctrlc_handler(running.clone())?;

    endpoint
        .open()
        .map_err(|err| endpoint_error("open failed", err))?;
    if args.discard {
        endpoint
            .discard_buffers()
            .map_err(|err| endpoint_error("discard failed", err))?;
    }

    let result = session::exchange(
        &endpoint,
        &inbox,
        &args.exchange,
        &args.framing,
        &running,
        format,
    );
    endpoint.close();
    result
}

fn config_from(args: &SerialArgs) -> SerialConfig {
    let mut config = SerialConfig::new(&args.port, args.baud);
    config.line.parity = match args.parity {
        ParityArg::None => Parity::None,
        ParityArg::Odd => Parity::Odd,
        ParityArg::Even => Parity::Even,
        ParityArg::Mark => Parity::Mark,
        ParityArg::Space => Parity::Space,
    };
    config.line.stop_bits = match args.stop_bits {
        StopBitsArg::One => StopBits::One,
        StopBitsArg::OnePointFive => StopBits::OnePointFive,
        StopBitsArg::Two => StopBits::Two,
    };
    config.line.data_bits = args.data_bits;
    config.framing = args.framing.framing();
    config
}
