pub mod handlers;
pub mod setup;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("leasehold")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Exclusive and shared leases on named resources, shared through a database file")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("PATH")
                .global(true)
                .help("Lease database (overrides the configured `database`)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Read this config file instead of the global and project files"),
        )
        .arg(
            Arg::new("context")
                .long("context")
                .value_name("ID")
                .global(true)
                .help("Calling context recorded as lease owner [default: $LEASEHOLD_CONTEXT or pid-<pid>]"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print results as JSON"),
        )
        .subcommand(cmd_acquire())
        .subcommand(cmd_release())
        .subcommand(cmd_extend())
        .subcommand(cmd_count())
        .subcommand(cmd_wait())
        .subcommand(cmd_status())
        .subcommand(cmd_run())
}

fn resource_arg() -> Arg {
    Arg::new("resource")
        .required(true)
        .value_name("RESOURCE")
        .help("Name of the protected resource")
}

fn ttl_arg() -> Arg {
    Arg::new("ttl")
        .long("ttl")
        .value_name("SECS")
        .value_parser(value_parser!(u64))
        .help("Lease lifetime in seconds [default: configured default_ttl_secs]")
}

fn token_arg() -> Arg {
    Arg::new("token")
        .long("token")
        .value_name("TOKEN")
        .help("Holder token printed by `acquire --shared` [default: the exclusive lease]")
}

fn lock_mode_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("shared")
            .long("shared")
            .action(ArgAction::SetTrue)
            .help("Take one of --limit shared slots instead of the exclusive lease"),
    )
    .arg(
        Arg::new("limit")
            .long("limit")
            .value_name("N")
            .value_parser(value_parser!(u32))
            .requires("shared")
            .help("Concurrent holders admitted for a shared lease [default: configured default_limit]"),
    )
    .arg(ttl_arg())
    .arg(
        Arg::new("no-wait")
            .long("no-wait")
            .action(ArgAction::SetTrue)
            .help("Fail immediately instead of polling until admitted"),
    )
}

fn cmd_acquire() -> Command {
    lock_mode_args(
        Command::new("acquire")
            .about("Acquire a lease and print it")
            .arg(resource_arg()),
    )
}

fn cmd_release() -> Command {
    Command::new("release")
        .about("Release a lease")
        .arg(resource_arg())
        .arg(token_arg())
}

fn cmd_extend() -> Command {
    Command::new("extend")
        .about("Push a live lease's expiry to now + ttl")
        .arg(resource_arg())
        .arg(token_arg())
        .arg(ttl_arg())
}

fn cmd_count() -> Command {
    Command::new("count")
        .about("Print the number of live leases on a resource")
        .arg(resource_arg())
}

fn cmd_wait() -> Command {
    Command::new("wait")
        .about("Block until a resource has no live leases")
        .arg(resource_arg())
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("List live leases on a resource")
        .arg(resource_arg())
}

fn cmd_run() -> Command {
    lock_mode_args(
        Command::new("run")
            .about("Run a command while holding a lease, releasing it when the command exits")
            .arg(resource_arg()),
    )
    .arg(
        Arg::new("renew")
            .long("renew")
            .action(ArgAction::SetTrue)
            .help("Keep extending the lease while the command runs"),
    )
    .arg(
        Arg::new("command")
            .required(true)
            .num_args(1..)
            .last(true)
            .value_name("COMMAND")
            .help("Command and arguments, after `--`"),
    )
}
