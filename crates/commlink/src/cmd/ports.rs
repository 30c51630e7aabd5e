use commlink_endpoint::SerialEndpoint;

use crate::cmd::PortsArgs;
use crate::exit::{endpoint_error, CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports =
        SerialEndpoint::port_names().map_err(|err| endpoint_error("port scan failed", err))?;
    print_ports(&ports, format);
    Ok(SUCCESS)
}
