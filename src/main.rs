use chainfs::cli_interface::ChainFsCli;
use clap::Parser;
/// a CLI interface to users to create our filesystem, inspect an image,
/// or register it to `FUSE` and mount it.
///
/// The latter will block the program until we umount our filesystem ourselves,
///
/// or specify `--auto-unmount` when mounting this fs.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = ChainFsCli::parse();
    match args {
        ChainFsCli::Mkfs(args) => {
            //create a new file system
            chainfs::mkfs::mkfs(args.image_file_path)?;
        }
        ChainFsCli::Mount(args) => {
            //register a filesystem to `FUSE` and mount it
            chainfs::mount::mount(
                args.image_file_path,
                args.mount_point,
                args.auto_unmount,
                args.allow_other,
            )?;
        }
        ChainFsCli::Info(args) => {
            println!("{}", chainfs::info::info(args.image_file_path)?);
        }
    }
    Ok(())
}
