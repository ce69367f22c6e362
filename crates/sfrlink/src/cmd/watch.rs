use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{finish, install_ctrlc_handler, Context, WatchArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::print_interrupt;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: WatchArgs, ctx: &Context) -> CliResult<i32> {
    let session = ctx.connect()?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel::<u8>();
    for vector in &args.vectors {
        let index = session
            .with_map(|map| map.vector(vector))
            .map_err(|err| session_error("watch failed", err))?;
        let tx = tx.clone();
        session
            .on_interrupt(vector, move || {
                let _ = tx.send(index);
            })
            .map_err(|err| session_error(&format!("enable {vector} failed"), err))?;
        tracing::info!(%vector, index, "watching");
    }
    drop(tx);

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let index = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(index) => index,
            Err(RecvTimeoutError::Timeout) => {
                if session.mux().is_closed() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        printed = printed.saturating_add(1);
        let names = session.with_map(|map| {
            map.vector_names(index)
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        print_interrupt(index, &names, printed, ctx.format);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    if !session.mux().is_closed() {
        for vector in &args.vectors {
            if let Err(err) = session.set_interrupt_handler(vector, None) {
                tracing::debug!(%vector, error = %err, "disable failed");
            }
        }
    }

    finish(session)?;
    Ok(SUCCESS)
}
