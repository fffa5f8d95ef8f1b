//! List command.

use dmx_fs::Filesystem;
use dmx_harness::Registry;

use crate::cli::ListArgs;

use super::CommandResult;

/// Load and filter the catalog named by `args`.
pub fn execute_list<F: Filesystem>(args: &ListArgs, fs: &F) -> CommandResult<Registry> {
    args.validate()?;
    let catalog = args.select.load_catalog(fs)?;
    Ok(args.select.select(&catalog)?)
}

/// Render cases as a plain table, or as a catalog document that
/// `--catalog` accepts back.
pub fn render_list(registry: &Registry, json: bool) -> String {
    if json {
        let catalog = serde_json::json!({ "cases": registry.list_cases() });
        return serde_json::to_string_pretty(&catalog).expect("catalog serialization cannot fail");
    }

    let width = registry
        .list_cases()
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = String::new();
    out.push_str(&format!("{:<width$}  {:<8}  {:<6}  SAMPLE\n", "NAME", "ARCH", "FORMAT"));
    for case in registry.list_cases() {
        out.push_str(&format!(
            "{:<width$}  {:<8}  {:<6}  {}\n",
            case.name,
            case.architecture.display_name(),
            case.format.display_name(),
            case.sample.describe(),
        ));
    }
    out
}
