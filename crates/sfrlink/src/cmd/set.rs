use crate::cmd::{finish, parse_value, Context, SetArgs};
use crate::exit::{session_error, CliError, CliResult, DATA_INVALID, SUCCESS};

pub fn run(args: SetArgs, ctx: &Context) -> CliResult<i32> {
    let value = parse_value(&args.value)?;
    let session = ctx.connect()?;

    session
        .set(&args.name, value)
        .map_err(|err| session_error(&format!("set {} failed", args.name), err))?;
    tracing::info!(name = %args.name, value, "register written");

    if args.verify {
        let actual = session
            .read_register(&args.name)
            .map_err(|err| session_error(&format!("read back {} failed", args.name), err))?;
        if actual != value {
            let _ = session.close();
            return Err(CliError::new(
                DATA_INVALID,
                format!(
                    "{} reads back {actual:#04x} after writing {value:#04x}",
                    args.name
                ),
            ));
        }
    }

    finish(session)?;
    Ok(SUCCESS)
}
