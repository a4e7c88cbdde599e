use std::env;

use crate::app::controller::{AppController, Command};
use crate::config::Settings;
use crate::error::Result;

/// Entry point used by `main`: read configuration, build the object graph,
/// run the requested command.
pub async fn run() -> Result<()> {
    let command = Command::from_args(env::args().skip(1))?;
    let settings = Settings::from_env()?;
    let controller = AppController::build(settings)?;
    controller.run(command).await
}
