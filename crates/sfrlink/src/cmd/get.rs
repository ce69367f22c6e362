use crate::cmd::{finish, Context, GetArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::print_values;

pub fn run(args: GetArgs, ctx: &Context) -> CliResult<i32> {
    let session = ctx.connect()?;

    let mut values = Vec::with_capacity(args.names.len());
    for name in args.names {
        let value = session
            .get(&name)
            .map_err(|err| session_error(&format!("get {name} failed"), err))?;
        tracing::debug!(%name, %value, "read");
        values.push((name, value));
    }

    print_values(&values, ctx.format);
    finish(session)?;
    Ok(SUCCESS)
}
