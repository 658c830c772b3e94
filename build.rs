// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Arguments every graph-resolving command takes
fn graph_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("reference")
            .required(true)
            .help("Recipe reference: name/version or name/[range]"),
    )
    .arg(
        Arg::new("index")
            .short('i')
            .long("index")
            .value_name("DIR")
            .required(true)
            .action(ArgAction::Append)
            .help("Recipe index folder; may be given several times"),
    )
    .arg(
        Arg::new("profile_host")
            .long("profile-host")
            .value_name("FILE")
            .help("Host profile"),
    )
    .arg(
        Arg::new("profile_build")
            .long("profile-build")
            .value_name("FILE")
            .help("Build profile; defaults to the host profile"),
    )
}

fn build_cli() -> Command {
    Command::new("pantry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build and package C/C++ recipes into relocatable binaries")
        .subcommand_required(true)
        .subcommand(
            graph_args(Command::new("create").about("Resolve, build and package a recipe and its dependencies"))
                .arg(
                    Arg::new("keep_going")
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Keep building independent packages after a failure"),
                )
                .arg(
                    Arg::new("build")
                        .long("build")
                        .value_name("POLICY")
                        .help("Build policy: missing, always or never"),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .value_name("N")
                        .help("Nodes driven in parallel"),
                ),
        )
        .subcommand(graph_args(
            Command::new("graph").about("Print the resolved graph with package ids, without building"),
        ))
        .subcommand(graph_args(
            Command::new("source").about("Acquire the sources of a recipe into the cache"),
        ))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let mut buffer = Vec::new();
    if let Err(e) = Man::new(build_cli()).render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    if let Err(e) = fs::write(man_dir.join("pantry.1"), buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
