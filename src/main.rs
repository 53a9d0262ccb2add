use backtrace::Backtrace;
use clap::{Arg, Command};
use ringlog::*;

use strata::config::{Config, GroupKind};
use strata::perf::{
    sched_switch_tracepoint_id, AttrsBuffer, EventGroups, EventRequest, GroupIdentifier,
    GroupsConfig, PerfCapabilities, RingBufferConfig, SampleFormat,
};

/// Bounds a single oversized blob in the attributes stream.
const ATTRS_BUFFER_SIZE: usize = 1024 * 1024;

/// Synthetic follower keys count down from here; caller keys are
/// non-negative so the two ranges never meet.
const FIRST_DUMMY_KEY: i32 = -2;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "Strata captures hardware performance counters and scheduling \
             activity across cpu clusters.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Daemon configuration file")
                .action(clap::ArgAction::Set)
                .required(true)
                .index(1),
        )
        .get_matches();

    // load config from file
    let config = {
        let file = matches.get_one::<String>("CONFIG").unwrap();
        match Config::load(file) {
            Ok(c) => c,
            Err(error) => {
                eprintln!("error loading config file: {file}\n{error}");
                std::process::exit(1);
            }
        }
    };

    // configure debug log
    let debug_output: Box<dyn Output> = Box::new(Stderr::new());

    let level = config.log().level();

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .build()
    .expect("failed to initialize debug log");

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(debug_log)
        .build()
        .start();

    // initialize async runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("strata")
        .build()
        .expect("failed to launch async runtime");

    // spawn logging thread
    rt.spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let _ = log.flush();
        }
    });

    // bring every core online long enough to identify it
    let coerce_online = !config.general().tolerate_offline_cores();
    let topology = match coretopo::identify(coerce_online, true) {
        Ok(topology) => topology,
        Err(error) => {
            eprintln!("unable to identify cpus: {error}");
            std::process::exit(1);
        }
    };

    info!(
        "identified {} cpus on '{}'",
        topology.cpu_count(),
        topology.hardware_name.as_deref().unwrap_or("unknown")
    );
    for (cpu, id) in topology.cpu_ids.iter().enumerate() {
        debug!("cpu{cpu}: identity {id} cluster {:?}", topology.clusters[cpu]);
    }

    let caps = PerfCapabilities::detect(config.general().system_wide());

    // the sched switch control counter takes the first key after the
    // configured ones
    let sched_switch_key = config
        .counters()
        .iter()
        .map(|c| c.key)
        .max()
        .map_or(0, |key| key + 1);

    let mut groups = EventGroups::new(GroupsConfig {
        caps,
        ring: RingBufferConfig {
            data_buffer_size: config.perf().data_buffer_size(),
            aux_buffer_size: config.perf().aux_buffer_size(),
        },
        exclude_kernel_events: config.general().exclude_kernel_events(),
        backtrace_depth: config.general().backtrace_depth(),
        sample_rate: config.general().sample_rate(),
        enable_periodic_sampling: config.general().periodic_sampling(),
        sched_switch_id: sched_switch_tracepoint_id(),
        sched_switch_key,
        dummy_key_counter: FIRST_DUMMY_KEY,
    });

    let mut attrs = AttrsBuffer::new(ATTRS_BUFFER_SIZE);

    // one group leader per cluster drives switch tracking and pc sampling
    for cluster in topology.cluster_ids() {
        let identifier = GroupIdentifier::PerClusterCpu(cluster);
        if let Err(error) = groups.create_group_leader(&identifier, &mut attrs) {
            eprintln!("unable to configure the cluster {cluster} group leader: {error}");
            std::process::exit(1);
        }
    }

    for counter in config.counters() {
        let identifier = match counter.group {
            GroupKind::Cluster => GroupIdentifier::PerClusterCpu(counter.cluster.unwrap_or(0)),
            GroupKind::Uncore => GroupIdentifier::UncorePmu {
                pmu: counter.pmu.clone().unwrap_or_default(),
                instance: counter.instance,
            },
            GroupKind::Cpu => GroupIdentifier::SpecificCpu(counter.cpu.unwrap_or(0)),
            GroupKind::Global => GroupIdentifier::Global,
            GroupKind::Spe => GroupIdentifier::Spe(counter.cpu.unwrap_or(0)),
        };

        // uncore groups get their leader on first use
        if matches!(identifier, GroupIdentifier::UncorePmu { .. })
            && groups.group(&identifier).is_empty()
        {
            if let Err(error) = groups.create_group_leader(&identifier, &mut attrs) {
                eprintln!("unable to configure the {identifier:?} group leader: {error}");
                std::process::exit(1);
            }
        }

        let request = EventRequest {
            type_: counter.event_type,
            config: counter.event_config,
            config1: counter.config1,
            config2: counter.config2,
            period_or_freq: counter.period,
            sample_type: if counter.period > 0 {
                SampleFormat::READ
            } else {
                SampleFormat::empty()
            },
            freq: counter.freq,
            ..Default::default()
        };

        if let Err(error) =
            groups.add_event(&identifier, false, &mut attrs, counter.key, &request, counter.aux)
        {
            eprintln!("unable to configure counter key {}: {error}", counter.key);
            std::process::exit(1);
        }
    }

    info!(
        "configured {} events in {} groups ({} attribute bytes)",
        groups.event_count(),
        groups.iter().count(),
        attrs.len()
    );
    for (identifier, events) in groups.iter() {
        debug!(
            "{identifier:?}: {} events, fan-out {:?}",
            events.len(),
            identifier.target_cpus(&topology)
        );
    }

    // hand off point: the open/mmap/transport phases consume the groups
    // and drain the attributes stream
    let _attrs = attrs.take();

    // let the log drain before returning
    std::thread::sleep(std::time::Duration::from_millis(200));
}
