use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use ramsey_enumeration::artifact;
use ramsey_enumeration::config::{CounterConfig, PipelineConfig};
use ramsey_enumeration::counter::{BuiltinCounter, Counter, ProcessCounter, write_results};
use ramsey_enumeration::generator::GengProcess;
use ramsey_enumeration::pipeline::{Pipeline, StartMode, count_and_load};
use ramsey_enumeration::server::{self, AppState};
use ramsey_enumeration::store::ResultStore;
use ramsey_enumeration::{
  ParameterPair, PartitionScheme, SHARD_BAR, ShardRunner, plan, progress_bar,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sharded graph enumeration and Ramsey clique statistics")]
struct Args {
  /// JSON pipeline configuration; defaults are used when omitted
  #[clap(short, long)]
  config: Option<PathBuf>,

  /// trace, debug, info, warn or error
  #[clap(long, default_value_t = Level::INFO)]
  log_level: Level,

  /// Hide progress bars
  #[clap(short, long)]
  quiet: bool,

  #[clap(subcommand)]
  command: Cmd,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
  #[clap(long)]
  vertices: u32,
  #[clap(long, default_value_t = 1)]
  shards: u32,
  /// Per-shard record cap; capped shards make the artifact a sample
  #[clap(long)]
  limit: Option<u64>,
  #[clap(long, value_enum, default_value_t = PartitionScheme::EdgeCount)]
  scheme: PartitionScheme,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Print the shard plan for a vertex count
  Plan(PlanArgs),
  /// Run every shard of a plan into one artifact
  Generate {
    #[clap(flatten)]
    plan: PlanArgs,
    #[clap(long)]
    out: PathBuf,
    /// Append after the records already in the artifact instead of starting from 0
    #[clap(long)]
    resume: bool,
  },
  /// Count cliques for family (m, n) and write JSON lines to stdout
  Count { m: u32, n: u32, artifact: PathBuf },
  /// Count with the configured counter and load into the store
  Load { m: u32, n: u32, artifact: PathBuf },
  /// Check that artifact ids are contiguous
  Verify {
    artifact: PathBuf,
    #[clap(long, default_value_t = 0)]
    start: u64,
  },
  /// Run configured jobs through generate, count and load
  Run {
    /// Only run the job at this position in the config
    #[clap(long)]
    job: Option<usize>,
    #[clap(long)]
    resume: bool,
  },
  /// Serve the read-only HTTP API
  Serve {
    #[clap(long)]
    bind: Option<String>,
  },
}

fn main() -> Result<()> {
  let args = Args::parse();

  // logs go to stderr so `count` can own stdout
  let subscriber = FmtSubscriber::builder()
    .with_max_level(args.log_level)
    .with_writer(io::stderr)
    .finish();
  tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

  let config = PipelineConfig::load_or_default(args.config.as_deref())?;
  let progress = !args.quiet;

  match args.command {
    Cmd::Plan(p) => {
      for descriptor in plan(p.vertices, p.shards, p.limit, p.scheme)? {
        println!("{}", serde_json::to_string(&descriptor)?);
      }
    }
    Cmd::Generate { plan: p, out, resume } => {
      let descriptors = plan(p.vertices, p.shards, p.limit, p.scheme)?;
      let start_id = if resume {
        artifact::prepare_resume(&out)?
      } else {
        artifact::reset(&out)?;
        0
      };
      let geng = geng_from(&config);
      let pb = progress_bar(descriptors.len() as u64, SHARD_BAR, progress);
      let outcome = ShardRunner::new(&geng).run_sequence(&descriptors, &out, start_id, &pb)?;
      pb.finish_and_clear();
      println!(
        "{}: ids {}..{} ({} records, {} shards capped by the record limit)",
        out.display(),
        outcome.first_id,
        outcome.next_start_id,
        outcome.records,
        outcome.limited_shards.len()
      );
    }
    Cmd::Count { m, n, artifact } => {
      let pair = ParameterPair::new(m, n)?;
      let results = BuiltinCounter { progress: false }.count(pair, &artifact)?;
      let stdout = io::stdout();
      write_results(&mut BufWriter::new(stdout.lock()), &results)?;
    }
    Cmd::Load { m, n, artifact } => {
      let pair = ParameterPair::new(m, n)?;
      let counter = counter_from(&config, progress);
      let mut store = open_store(&config)?;
      let rows = count_and_load(counter.as_ref(), &mut store, pair, &artifact)?;
      info!(table = %pair.table_name(), rows, "load complete");
    }
    Cmd::Verify { artifact, start } => {
      let summary = artifact::verify(&artifact, start)?;
      println!("{}", serde_json::to_string(&summary)?);
    }
    Cmd::Run { job, resume } => {
      let jobs = match job {
        Some(i) => match config.jobs.get(i) {
          Some(job) => std::slice::from_ref(job),
          None => bail!("no job at index {i}; config has {}", config.jobs.len()),
        },
        None => config.jobs.as_slice(),
      };
      let geng = geng_from(&config);
      let counter = counter_from(&config, progress);
      let mut store = open_store(&config)?;
      let start = if resume { StartMode::Resume } else { StartMode::Fresh };
      for job in jobs {
        let report = Pipeline::new(&geng, counter.as_ref(), &mut store)
          .with_progress(progress)
          .run(job, start)
          .with_context(|| format!("job for {} vertices", job.vertex_count))?;
        println!("{}", serde_json::to_string(&report)?);
      }
    }
    Cmd::Serve { bind } => {
      let bind = bind.unwrap_or_else(|| config.server.bind.clone());
      let state = AppState::new(
        open_store(&config)?,
        config.server.static_dir.clone(),
        config.default_table()?,
      );
      let runtime = tokio::runtime::Runtime::new()?;
      runtime.block_on(async {
        let listener = TcpListener::bind(&bind)
          .await
          .with_context(|| format!("binding {bind}"))?;
        server::serve(listener, Arc::new(state)).await?;
        anyhow::Ok(())
      })?;
    }
  }
  Ok(())
}

fn geng_from(config: &PipelineConfig) -> GengProcess {
  GengProcess::new(
    config.generator.program.clone(),
    config.generator.args.clone(),
    config.generator.timeout(),
  )
}

fn counter_from(config: &PipelineConfig, progress: bool) -> Box<dyn Counter> {
  match &config.counter {
    CounterConfig::Builtin => Box::new(BuiltinCounter { progress }),
    CounterConfig::Process { program, args, timeout_secs } => Box::new(ProcessCounter::new(
      program.clone(),
      args.clone(),
      timeout_secs.map(std::time::Duration::from_secs),
    )),
  }
}

fn open_store(config: &PipelineConfig) -> Result<ResultStore> {
  let store = ResultStore::open(&config.store.path, config.store.retry_policy())?;
  Ok(store)
}
