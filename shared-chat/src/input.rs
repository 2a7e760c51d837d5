use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::session::{Action, EXIT_COMMAND};

/// Reads lines on a background task and forwards each as [`Action::UserLine`].
///
/// End of input and read errors both end the task after a single
/// synthesized `/exit` line, which is how the session learns to shut down.
pub fn spawn_reader<R>(reader: R, actions: mpsc::Sender<Action>) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(read_lines(reader, actions))
}

async fn read_lines<R>(reader: R, actions: mpsc::Sender<Action>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if actions.send(Action::UserLine(line)).await.is_err() {
                    debug!("session gone; reader stopping");
                    return;
                }
            }
            Ok(None) => {
                debug!("end of input");
                break;
            }
            Err(err) => {
                warn!(error = %err, "failed to read input");
                break;
            }
        }
    }

    let _ = actions
        .send(Action::UserLine(EXIT_COMMAND.to_string()))
        .await;
}
