//! `outputs`: print the published endpoint of the last deployment.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use midl_installer::{ui, Environment, InstallConfig, Outputs, RunState};

/// Show the validator endpoint and last run state.
#[derive(Args, Debug)]
pub struct OutputsCommand {
    /// Directory for run state and outputs [default: .midl/<PROJECT_RAND_ID>].
    #[arg(long, env = "MIDL_OUTPUT_DIR", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Print outputs as JSON.
    #[arg(long)]
    json: bool,
}

impl OutputsCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns an error if no deployment outputs exist.
    pub fn run(&self) -> Result<()> {
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => InstallConfig::with_defaults(Environment::from_env()?).output_dir,
        };

        let Some(outputs) = Outputs::read(&dir)? else {
            bail!("No outputs in {}; run `midl deploy` first", dir.display());
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&outputs)?);
            return Ok(());
        }

        ui::print_kv("lb_ip", &outputs.lb_ip.to_string());
        ui::print_kv("p2p_port", &outputs.p2p_port.to_string());

        if let Some(state) = RunState::load(&dir)? {
            ui::print_kv("Last step", state.step.description());
            ui::print_kv("Updated", &state.updated_at);
            if let Some(err) = &state.last_error {
                ui::print_warning(&format!("Last run failed: {err}"));
            } else if !state.is_complete() {
                ui::print_warning("Outputs are from an earlier deployment");
            }
        }
        Ok(())
    }
}
