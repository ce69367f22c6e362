use crate::cmd::{Context, IsrsArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::print_raw;

/// Firmware source forwarding every vector in the map to the host. Always
/// plain text, whatever `--format` says.
pub fn run(_args: IsrsArgs, ctx: &Context) -> CliResult<i32> {
    let map = ctx.load_map()?;
    print_raw(map.firmware_isrs().as_bytes());
    Ok(SUCCESS)
}
