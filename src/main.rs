use std::{error::Error, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use roosty_alarm::{
    background::TokioBackgroundTasks,
    bridge,
    config::Config,
    notification::DesktopNotifications,
    rodio_backend::{RodioOutput, RodioResolver},
    session::DesktopSession,
    shutdown::termination_token,
    AlarmPlugin, AlarmSpec, Ports,
};
use tokio::io::BufReader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config and create the asset directories.
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// Set one alarm and wait until it has stopped.
    Ring {
        #[clap(long)]
        id: i64,
        /// seconds from now
        #[clap(long)]
        delay: f64,
        #[clap(long)]
        sound: String,
        #[clap(long = "loop")]
        loop_audio: bool,
        /// seconds to ramp up from near silence
        #[clap(long, default_value_t = 0.0)]
        fade: f64,
        #[clap(long)]
        vibrate: bool,
        /// system volume to force while ringing, 0 to 1
        #[clap(long)]
        volume: Option<f32>,
    },
    /// Answer bridge calls, one JSON object per line on stdin.
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("roosty_alarm").expect("couldn't initialize logger");

    let args = Args::parse();
    let config = Config::config_path().map_or_else(|_| Config::default(), Config::load_or_default);
    match args.command {
        Command::Init { force } => init(&config, force),
        Command::Ring {
            id,
            delay,
            sound,
            loop_audio,
            fade,
            vibrate,
            volume,
        } => {
            let mut spec = AlarmSpec::new(id, Duration::try_from_secs_f64(delay)?, sound)
                .looping(loop_audio)
                .fade(Duration::try_from_secs_f64(fade)?)
                .vibrating(vibrate)
                .with_notification("Alarm", format!("alarm {id} is ringing"))
                .with_kill_notice(
                    "Roosty alarm was closed",
                    "Your alarm will not ring. Open the app to reschedule it.",
                );
            if let Some(volume) = volume {
                spec = spec.with_volume(volume);
            }
            ring(&config, spec).await
        }
        Command::Serve => serve(&config).await,
    }
}

fn init(config: &Config, force: bool) -> Result<(), Box<dyn Error>> {
    if force && Config::is_config_present() || !Config::is_config_present() {
        config.save(Config::config_path()?)?;
    }
    std::fs::create_dir_all(&config.assets.bundle_dir)?;
    std::fs::create_dir_all(&config.assets.documents_dir)?;
    println!(
        "put bundled sounds under {} and other sounds in {}",
        config.assets.bundle_dir.join("assets").display(),
        config.assets.documents_dir.display()
    );
    Ok(())
}

/// Starts the engine on the desktop adapters and forwards refresh grants to it.
fn start(config: &Config) -> Result<(AlarmPlugin, tokio::task::JoinHandle<()>), Box<dyn Error>> {
    let (background, mut grants) = TokioBackgroundTasks::new();
    let ports = Ports {
        resolver: Arc::new(RodioResolver::new(RodioOutput::open_default()?, &config.assets)),
        session: Arc::new(DesktopSession::default()),
        notifications: Arc::new(DesktopNotifications::new()),
        background: Arc::new(background),
    };
    let (plugin, task) = AlarmPlugin::start(ports, config);

    let refresher = plugin.clone();
    tokio::spawn(async move {
        while let Some(grant) = grants.recv().await {
            log::info!("background refresh {}", grant.identifier);
            let rearmed = refresher.background_refresh().await;
            log::debug!("{rearmed} alarms re-armed");
        }
    });
    Ok((plugin, task))
}

async fn ring(config: &Config, spec: AlarmSpec) -> Result<(), Box<dyn Error>> {
    let (plugin, task) = start(config)?;
    let id = spec.id;
    plugin.set_alarm(spec).await?;
    println!("alarm {id} set, Ctrl-C to stop");

    let shutdown = termination_token()?;
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                plugin.terminating().await;
                break;
            }
            _ = poll.tick() => {
                if plugin.snapshot().await?.alarms.is_empty() {
                    break;
                }
            }
        }
    }
    plugin.shutdown();
    task.await?;
    Ok(())
}

async fn serve(config: &Config) -> Result<(), Box<dyn Error>> {
    let (plugin, task) = start(config)?;
    let shutdown = termination_token()?;
    let served = bridge::serve(
        &plugin,
        BufReader::new(tokio::io::stdin()),
        &mut tokio::io::stdout(),
        shutdown,
    )
    .await;
    plugin.shutdown();
    task.await?;
    served?;
    Ok(())
}
