use crate::app::records_reply;
use crate::config::Config;
use crate::recorder::encoder;
use crate::storage::{channel_prefix, BlobStore, LinkGenerator, S3BlobStore, UploadPipeline};
use anyhow::{anyhow, Result};
use std::sync::Arc;

pub mod args;

pub use args::{ChannelArgs, Cli, CliCommand};

fn blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let store = S3BlobStore::from_config(&config.storage)?;
    Ok(Arc::new(store))
}

pub async fn handle_records_command(config: &Config, args: ChannelArgs) -> Result<()> {
    let links = LinkGenerator::new(
        blob_store(config)?,
        config.storage.link_ttl(),
        config.pipeline.max_concurrency,
    );
    let result = links.generate(&channel_prefix(&args.channel_id)).await;
    println!("{}", records_reply(result, links.validity()));
    Ok(())
}

pub async fn handle_upload_command(config: &Config, args: ChannelArgs) -> Result<()> {
    let directory = config.recording.records_dir.join(&args.channel_id);
    if !directory.is_dir() {
        return Err(anyhow!(
            "No staging directory for channel {} at {:?}",
            args.channel_id,
            directory
        ));
    }

    let encoder = encoder::from_config(&config.recording);
    let pipeline = UploadPipeline::new(
        blob_store(config)?,
        encoder.extension(),
        config.pipeline.max_concurrency,
    );
    let report = pipeline.upload(&directory).await;

    for file in &report.files {
        let outcome = if file.uploaded { "uploaded" } else { "FAILED" };
        println!("{:<8} {} -> {}", outcome, file.path.display(), file.key);
    }
    println!(
        "{} uploaded, {} failed{}",
        report.uploaded(),
        report.failed(),
        if report.directory_removed {
            ", staging directory removed"
        } else {
            ""
        }
    );

    if report.failed() > 0 {
        return Err(anyhow!("{} files could not be uploaded", report.failed()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_records() {
        let cli = Cli::try_parse_from(["voicevault", "records", "123"]).unwrap();
        assert!(!cli.verbose);
        match cli.command {
            CliCommand::Records(args) => assert_eq!(args.channel_id, "123"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_upload_verbose() {
        let cli = Cli::try_parse_from(["voicevault", "upload", "9", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, CliCommand::Upload(args) if args.channel_id == "9"));
    }

    #[test]
    fn test_channel_id_required() {
        assert!(Cli::try_parse_from(["voicevault", "records"]).is_err());
    }

    #[tokio::test]
    async fn test_upload_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.recording.records_dir = root.path().to_path_buf();

        let result = handle_upload_command(
            &config,
            ChannelArgs {
                channel_id: "absent".to_string(),
            },
        )
        .await;
        assert!(result.is_err());
    }
}
