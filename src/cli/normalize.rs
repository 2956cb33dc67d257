use crate::cli::{emit, load_config};
use crate::error::{Error as KernelCfgError, Result as KernelCfgResult};
use crate::pipeline::load_kernels;
use crate::transforms::structure_exits;
use rayon::prelude::*;
use std::path::PathBuf;

/// Arguments of the normalize subcommand
#[derive(Debug, Clone)]
pub struct NormalizeArgs {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    /// Print the lowered IR as text instead of JSON
    pub text: bool,
}

/// Run the normalize subcommand: lower non-local exits and write the result
pub fn normalize(args: &NormalizeArgs) -> KernelCfgResult<()> {
    let config = load_config(args.config_path.as_deref())?;
    let mut kernels = load_kernels(&args.input_path)?;

    let modified = kernels
        .par_iter_mut()
        .map(|kernel| structure_exits(&mut kernel.ir, &config))
        .collect::<KernelCfgResult<Vec<bool>>>()?;
    for (kernel, changed) in kernels.iter().zip(&modified) {
        eprintln!(
            "{}: {}",
            kernel.name,
            if *changed { "lowered" } else { "unchanged" }
        );
    }

    let out = if args.text {
        kernels
            .iter()
            .map(|kernel| format!("// {}\n{}", kernel.name, kernel.ir))
            .collect::<String>()
    } else {
        let json = if kernels.len() == 1 {
            serde_json::to_string_pretty(&kernels[0])
        } else {
            serde_json::to_string_pretty(&kernels)
        };
        json.map_err(KernelCfgError::from)? + "\n"
    };
    emit(args.output_path.as_deref(), &out)
}
