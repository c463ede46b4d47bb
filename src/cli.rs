use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use ffmpeg_pipeline::{Endpoint, Mode, TranscodeConfig, TranscodeTask};
use futures::StreamExt;

#[derive(Parser, Debug)]
#[command(name = "transcode")]
#[command(about = "Transcode, remux or probe media containers")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode every audio and video stream and encode it again
    Transcode(TranscodeCommand),
    /// Copy streams into another container without decoding
    Remux(EndpointArgs),
    /// Print container and stream information
    Probe(ProbeCommand),
    /// Run a pipeline described by a JSON config file
    Run(RunCommand),
}

#[derive(ClapArgs, Debug)]
pub struct EndpointArgs {
    pub input: String,
    pub output: String,
    /// Input container format, skipping probing
    #[arg(short = 'i', long = "input-format")]
    pub input_format: Option<String>,
    /// Output container format, instead of guessing from the file name
    #[arg(short = 'o', long = "output-format")]
    pub output_format: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct TranscodeCommand {
    #[command(flatten)]
    pub endpoints: EndpointArgs,
    /// Video encoder name, defaults to the source codec
    #[arg(long)]
    pub video_codec: Option<String>,
    /// Audio encoder name, defaults to the source codec
    #[arg(long)]
    pub audio_codec: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ProbeCommand {
    pub input: String,
    #[arg(short = 'i', long = "input-format")]
    pub input_format: Option<String>,
    /// Print JSON instead of key=value sections
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct RunCommand {
    pub config: PathBuf,
    /// Copy streams instead of transcoding them
    #[arg(long)]
    pub remux: bool,
}

impl EndpointArgs {
    pub fn config(&self) -> TranscodeConfig {
        let endpoint = |location: &str, format: &Option<String>| match format {
            Some(format) => Endpoint::new(location).with_format(format),
            None => Endpoint::new(location),
        };
        TranscodeConfig::new(
            endpoint(&self.input, &self.input_format),
            endpoint(&self.output, &self.output_format),
        )
    }
}

impl TranscodeCommand {
    pub fn config(&self) -> TranscodeConfig {
        TranscodeConfig {
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            ..self.endpoints.config()
        }
    }
}

impl RunCommand {
    pub fn config(&self) -> Result<TranscodeConfig> {
        TranscodeConfig::from_file(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))
    }

    pub fn mode(&self) -> Mode {
        if self.remux { Mode::Remux } else { Mode::Transcode }
    }
}

impl Args {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Transcode(cmd) => run_task(cmd.config(), Mode::Transcode).await,
            Command::Remux(cmd) => run_task(cmd.config(), Mode::Remux).await,
            Command::Probe(cmd) => {
                let info = ffmpeg_pipeline::probe(&cmd.input, cmd.input_format.as_deref())
                    .with_context(|| format!("probing {}", cmd.input))?;
                if cmd.json {
                    println!("{}", serde_json::to_string_pretty(&info)?);
                } else {
                    print!("{}", info);
                }
                Ok(())
            }
            Command::Run(cmd) => run_task(cmd.config()?, cmd.mode()).await,
        }
    }
}

/// Run one pipeline to completion, stopping it on Ctrl-C, and print its
/// statistics as JSON.
async fn run_task(config: TranscodeConfig, mode: Mode) -> Result<()> {
    let description = format!(
        "{:?} {} -> {}",
        mode, config.input.location, config.output.location
    );
    let mut task = TranscodeTask::new();
    let mut progress = task.progress();
    task.start(config, mode)?;

    let cancel = task.cancel_token();
    let watcher = tokio::spawn(async move {
        let mut written = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("interrupted, stopping");
                    cancel.cancel();
                    break;
                }
                event = progress.next() => match event {
                    Some(ffmpeg_pipeline::Progress::Packet { .. }) => {
                        written += 1;
                        if written % 1000 == 0 {
                            log::info!("{} packets written", written);
                        }
                    }
                    Some(ffmpeg_pipeline::Progress::Finished(_)) | None => break,
                    Some(ffmpeg_pipeline::Progress::Started) => log::debug!("pipeline started"),
                },
            }
        }
    });

    let result = task.wait().await;
    watcher.abort();
    let stats = result.with_context(|| description.clone())?;
    log::info!("{} done", description);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("transcode").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn test_transcode_arguments() {
        let args = parse(&[
            "transcode",
            "in.mkv",
            "out.bin",
            "-o",
            "nut",
            "--video-codec",
            "mpeg4",
        ]);
        let Command::Transcode(cmd) = args.command else {
            panic!("expected transcode");
        };
        let config = cmd.config();
        assert_eq!(config.input, Endpoint::new("in.mkv"));
        assert_eq!(config.output, Endpoint::new("out.bin").with_format("nut"));
        assert_eq!(config.video_codec.as_deref(), Some("mpeg4"));
        assert_eq!(config.audio_codec, None);
    }

    #[test]
    fn test_remux_arguments() {
        let args = parse(&["remux", "-i", "mpegts", "in.ts", "out.mp4"]);
        let Command::Remux(cmd) = args.command else {
            panic!("expected remux");
        };
        let config = cmd.config();
        assert_eq!(config.input.format(), Some("mpegts"));
        assert_eq!(config.output.format(), None);
        assert!(config.header_options.is_empty());
    }

    #[test]
    fn test_missing_output_is_rejected() {
        assert!(Args::try_parse_from(["transcode", "transcode", "in.mkv"]).is_err());
    }

    #[test]
    fn test_run_config_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"input":{{"location":"in.nut"}},"output":{{"location":"out.mp4"}},
                "header_options":{{"movflags":"faststart"}}}}"#
        )?;
        let path = file.path().to_string_lossy().into_owned();

        let args = parse(&["run", &path, "--remux"]);
        let Command::Run(cmd) = args.command else {
            panic!("expected run");
        };
        assert_eq!(cmd.mode(), Mode::Remux);
        let config = cmd.config()?;
        assert_eq!(config.output.location, "out.mp4");
        assert_eq!(config.header_options()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_run_config_file_missing() {
        let args = parse(&["run", "/nonexistent/config.json"]);
        let Command::Run(cmd) = args.command else {
            panic!("expected run");
        };
        let err = cmd.config().unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/config.json"));
    }
}
