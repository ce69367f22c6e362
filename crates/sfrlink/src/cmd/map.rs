use crate::cmd::{Context, MapArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::print_map;

pub fn run(args: MapArgs, ctx: &Context) -> CliResult<i32> {
    let map = ctx.load_map()?;
    print_map(&map, args.kind.as_deref(), ctx.format);
    Ok(SUCCESS)
}
