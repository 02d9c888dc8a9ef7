use clap::Parser;
use runtime_loader::{
    assembly::{Assembly, AssemblyStore},
    types::RuntimeType,
    Loader, LoaderConfig, LoaderResult,
};
use std::{fs, path::PathBuf, process::ExitCode};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Load a non-generic exported type and dump its runtime layout"
)]
struct Args {
    /// JSON assembly files to load into the store
    #[arg(short, long = "assembly", value_name = "FILE", required = true)]
    assemblies: Vec<PathBuf>,
    /// Assembly exporting the type
    assembly: String,
    /// Exported name of the type (e.g. Core.Int32)
    export_name: String,
}

fn read_assembly(path: &PathBuf) -> Result<Assembly, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    Assembly::from_json(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn load(args: &Args, assemblies: Vec<Assembly>) -> LoaderResult<(Loader, std::sync::Arc<RuntimeType>)> {
    let loader = Loader::new(AssemblyStore::new(assemblies)?, LoaderConfig::from_env())?;
    let ty = loader.get_type_by_name(&args.assembly, &args.export_name, vec![])?;
    Ok((loader, ty))
}

fn type_name(loader: &Loader, id: runtime_loader::types::TypeId) -> String {
    loader
        .get_type_by_id(id)
        .map(|t| t.args.to_string())
        .unwrap_or_else(|| id.to_string())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut assemblies = Vec::with_capacity(args.assemblies.len());
    for path in &args.assemblies {
        match read_assembly(path) {
            Ok(assembly) => assemblies.push(assembly),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let (loader, ty) = match load(&args, assemblies) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}: {}", e.code(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("Type: {} ({})", ty.args, ty.id);
    println!("Storage: {:?}", ty.storage);
    if let Some(layout) = ty.layout() {
        println!("Layout: {}", layout.type_tag());
    }
    println!("Size: {}, Alignment: {}", ty.size(), ty.alignment());
    if let Some(base) = ty.base_type {
        println!("Base: {}", type_name(&loader, base));
    }

    if !ty.fields.is_empty() {
        println!("\nFields:");
        for field in &ty.fields {
            println!(
                "  {:>4} +{:<3} {}: {}",
                field.offset,
                field.length,
                field.name,
                type_name(&loader, field.field_type)
            );
        }
    }

    if !ty.virtual_table.is_empty() {
        println!("\nVirtual table:");
        for (i, slot) in ty.virtual_table.iter().enumerate() {
            println!("  [{i}] {} -> {}", slot.name, slot.function);
        }
    }

    for entry in &ty.interfaces {
        println!("\nInterface {}:", type_name(&loader, entry.interface));
        for (i, slot) in entry.virtual_table.iter().enumerate() {
            println!("  [{i}] {} -> {}", slot.name, slot.function);
        }
    }

    ExitCode::SUCCESS
}
