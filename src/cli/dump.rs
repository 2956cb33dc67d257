use crate::error::Result as KernelCfgResult;
use crate::pipeline::load_kernels;
use std::path::Path;

/// Run the dump subcommand: print the IR of every kernel as text
pub fn dump(input_path: &Path) -> KernelCfgResult<()> {
    let kernels = load_kernels(input_path)?;
    for kernel in &kernels {
        println!("// {}", kernel.name);
        print!("{}", kernel.ir);
    }
    Ok(())
}
