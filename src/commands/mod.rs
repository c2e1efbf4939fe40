pub type CmdResult<T> = delegation_deploy::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod provision;
pub mod status;
pub mod upgrade;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (delegation_deploy::Result<serde_json::Value>, i32) {
    crate::tty::status("delegation-deploy is working...");

    match command {
        crate::Commands::Provision(args) => dispatch!(args, global, provision),
        crate::Commands::Status(args) => dispatch!(args, global, status),
        crate::Commands::Upgrade(args) => dispatch!(args, global, upgrade),
    }
}
