use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum ChainFsCli {
    /// create a new file system image
    Mkfs(MkfsArgs),
    /// register a filesystem to `FUSE` and mount it
    Mount(MountArgs),
    /// show capacity and usage of an image
    Info(InfoArgs),
}
///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
}

/// mount a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount a file system")]
pub struct MountArgs {
    /// the path of the file system image file, created when missing
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the mount point of the file system
    #[clap(short, long)]
    pub mount_point: String,
    /// unmount automatically when this process exits
    #[clap(long)]
    pub auto_unmount: bool,
    /// let users other than the mounting one access the file system
    #[clap(long)]
    pub allow_other: bool,
}

/// image information subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "show file system usage")]
pub struct InfoArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
}

/// test the `ChainFsCli` struct
/// test `mkfs` subcommand
#[cfg(test)]
mod mkfs_parse_args_tests {
    use super::*;
    /// test short parameter form
    #[test]
    fn test_short_parameter_form() {
        let args = ChainFsCli::parse_from(["chainfs", "mkfs", "-p", "test"]);
        assert_eq!(
            args,
            ChainFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
            })
        );
    }
    /// test long parameter form
    #[test]
    fn test_long_parameter_form() {
        let image_file_path_name = concat!("--", "image-file-path");
        let args = ChainFsCli::parse_from(["chainfs", "mkfs", image_file_path_name, "test"]);
        assert_eq!(
            args,
            ChainFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
            })
        );
    }
    #[test]
    fn test_missing_image_path() {
        assert!(ChainFsCli::try_parse_from(["chainfs", "mkfs"]).is_err());
    }
}
