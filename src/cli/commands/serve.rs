use clap::Args;

use super::config::LoggingConfig;
use crate::config::ConfigArgs;

#[derive(Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub logging: LoggingConfig,
}
