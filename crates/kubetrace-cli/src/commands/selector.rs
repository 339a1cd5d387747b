//! `kubetrace selector`: Show the selector a run would use.

use clap::Args;
use kubetrace_manager::params::KubeManagerParams;
use kubetrace_manager::selector::ContainerSelector;

use crate::commands::filter::FilterArgs;

/// Arguments for the `selector` command.
#[derive(Args, Debug)]
pub struct SelectorArgs {
    /// Container filter flags.
    #[command(flatten)]
    pub filter: FilterArgs,
}

/// Executes the `selector` command.
///
/// # Errors
///
/// Returns an error if a filter flag is invalid.
pub fn execute(args: &SelectorArgs) -> anyhow::Result<()> {
    let selector = build(&args.filter)?;
    println!("{}", serde_json::to_string_pretty(&selector)?);
    Ok(())
}

/// Builds the selector from validated filter flags.
fn build(filter: &FilterArgs) -> anyhow::Result<ContainerSelector> {
    let params = KubeManagerParams::from_map(&filter.to_params())?;
    Ok(ContainerSelector::from_params(&params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_namespaces_wins_over_namespace() {
        let filter = FilterArgs {
            namespace: Some("kube-system".into()),
            all_namespaces: true,
            ..FilterArgs::default()
        };
        assert_eq!(build(&filter).unwrap().namespace, "");
    }

    #[test]
    fn labels_are_parsed() {
        let filter = FilterArgs {
            selector: Some("app=foo,env=prod".into()),
            namespace: Some("default".into()),
            ..FilterArgs::default()
        };
        let selector = build(&filter).unwrap();
        assert_eq!(selector.namespace, "default");
        assert_eq!(selector.labels.len(), 2);
    }
}
