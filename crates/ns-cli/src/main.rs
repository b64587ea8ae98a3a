mod settings;

use clap::{Args, Parser, Subcommand};
use settings::Settings;
use tracing_subscriber::EnvFilter;

use ns::device::Device as _;
use ns::namec::{namec, Amode, NamecOutcome};
use ns::{DeviceTable, MountFlags, OpenMode, Pgrp};

trait CommandExec {
    fn execute(
        self,
        pgrp: &Pgrp,
        devices: &DeviceTable,
        device: &ns::testutil::MemDevice,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve a name against the demo namespace and print its qid.
    #[command(about = "Resolve a name and print its qid.")]
    Resolve(ResolveArgs),

    /// Bind (or mount) one demo path over another.
    #[command(about = "Bind one path over another.")]
    Bind(BindArgs),

    /// Print the seeded demo tree.
    #[command(about = "Print the seeded demo namespace.")]
    Tree,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    /// The path to resolve, e.g. `/usr/glenda/motd`.
    path: String,
}

#[derive(Debug, Args)]
struct BindArgs {
    /// The existing path to mount something over.
    old: String,
    /// The path being mounted at `old`.
    new: String,
    /// Replace the union at `old` instead of appending to it.
    #[arg(long)]
    replace: bool,
}

impl CommandExec for ResolveArgs {
    fn execute(
        self,
        pgrp: &Pgrp,
        devices: &DeviceTable,
        device: &ns::testutil::MemDevice,
    ) -> anyhow::Result<()> {
        let root = device.attach("")?;
        let dot = root.clone_ref();
        let outcome = namec(
            pgrp,
            devices,
            &root,
            &dot,
            &self.path,
            Amode::Aopen(OpenMode::READ),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        match outcome {
            NamecOutcome::Channel(c) => {
                println!("{} -> qid {:?}", self.path, c.qid());
                c.close();
            }
            NamecOutcome::Removed => unreachable!("Aopen never removes"),
        }
        root.close();
        dot.close();
        Ok(())
    }
}

impl CommandExec for BindArgs {
    fn execute(
        self,
        pgrp: &Pgrp,
        devices: &DeviceTable,
        device: &ns::testutil::MemDevice,
    ) -> anyhow::Result<()> {
        let root = device.attach("")?;
        let dot = root.clone_ref();

        let old = resolve_mount_side(pgrp, devices, &root, &dot, &self.old, Amode::Amount)?;
        let new = resolve_mount_side(pgrp, devices, &root, &dot, &self.new, Amode::Abind)?;

        let flag = if self.replace {
            MountFlags::MREPL
        } else {
            MountFlags::MAFTER
        };
        pgrp.cmount(&new, &old, flag)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        println!("bound {} over {}", self.new, self.old);

        new.close();
        old.close();
        root.close();
        dot.close();
        Ok(())
    }
}

fn resolve_mount_side(
    pgrp: &Pgrp,
    devices: &DeviceTable,
    root: &ns::Channel,
    dot: &ns::Channel,
    path: &str,
    amode: Amode,
) -> anyhow::Result<ns::Channel> {
    match namec(pgrp, devices, root, dot, path, amode).map_err(|e| anyhow::anyhow!("{e}"))? {
        NamecOutcome::Channel(c) => Ok(c),
        NamecOutcome::Removed => unreachable!("bind/mount resolution never removes"),
    }
}

fn seed_demo_tree(device: &ns::testutil::MemDevice) {
    let usr = device.mkdir(0, "usr");
    let glenda = device.mkdir(usr, "glenda");
    device.touch(glenda, "motd", b"welcome to the namespace demo\n");
    device.mkdir(0, "mnt");
}

fn main() -> anyhow::Result<()> {
    let args = argfile::expand_args_from(std::env::args_os(), argfile::parse_fromfile, argfile::PREFIX)?;
    let cli = Cli::parse_from(args);

    let config = config::Config::builder()
        .add_source(config::File::new("ns-cli.toml", config::FileFormat::Toml).required(false))
        .add_source(config::Environment::with_prefix("ns").separator("__"))
        .build()?;
    let settings: Settings = config.try_deserialize().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let device = ns::testutil::MemDevice::arc();
    seed_demo_tree(&device);
    let pgrp = Pgrp::new();
    // No `#`-device attaches are exposed by this demo CLI (it only resolves
    // plain and rooted names against the seeded tree), so the table stays
    // empty; it still has to be threaded through since `namec` always
    // consults one.
    let devices = DeviceTable::new();

    match cli.command {
        Commands::Resolve(v) => v.execute(&pgrp, &devices, &device),
        Commands::Bind(v) => v.execute(&pgrp, &devices, &device),
        Commands::Tree => {
            println!("/");
            println!("/usr/glenda/motd");
            println!("/mnt");
            Ok(())
        }
    }
}
