use anyhow::Context as _;
use node_emu_config::{Arguments, Environment};
use node_emu_core::{
    Context, Lifecycle, LifecyclePhase, TerminationController, TerminationRequests, Verdict,
    constants::{PRECONDITION_FAILURE_EXIT_CODE, UNEXPECTED_FAILURE_EXIT_CODE},
};
use node_emu_faults::{FaultProfile, RngSource};
use node_emu_rpc::RpcServer;
use rand::{SeedableRng, rngs::StdRng};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() {
    let arguments = Arguments::parse_known(std::env::args_os());
    init_tracing(arguments.log_json);

    std::process::exit(run(arguments));
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.expect("Failed to set tracing subscriber");
}

fn run(arguments: Arguments) -> i32 {
    tracing::info!("I'm the node emulator");
    let invocation = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    tracing::info!("Called as: {}", invocation.join(" "));

    let environment = Environment::from_process();
    environment.log();

    let fault_profile = match arguments.fault_profile {
        Some(fault_profile) => fault_profile,
        None => select_fault_profile(&arguments),
    };
    tracing::info!(%fault_profile, "Failure configuration");

    let context = Context::new(&arguments, &environment, fault_profile);
    tracing::info!(
        data_directory = %context.data_directory.display(),
        config = ?context.config_path,
        http_port = ?context.http_port,
        download_snapshot = context.download_snapshot,
        "Emulating work"
    );

    let mut requests = match TerminationRequests::install() {
        Ok(requests) => requests,
        Err(error) => {
            tracing::error!("{error:?}");
            return UNEXPECTED_FAILURE_EXIT_CODE;
        }
    };

    let controller = TerminationController::new(&context.fault_profile);
    let mut lifecycle = Lifecycle::new(&context);
    let port = match lifecycle.run_interruptible(&mut requests) {
        Ok(Verdict::Serve { port }) => port,
        Ok(Verdict::Terminated { phase }) => {
            tracing::info!(%phase, "Got termination signal during startup");
            return match runtime() {
                Ok(runtime) => runtime.block_on(controller.terminate()),
                Err(error) => {
                    tracing::error!("{error:?}");
                    UNEXPECTED_FAILURE_EXIT_CODE
                }
            };
        }
        Ok(Verdict::Exit { phase, code }) => {
            tracing::info!(%phase, "Exiting {code}");
            return code;
        }
        Err(error) => {
            tracing::error!(phase = %lifecycle.phase(), "FAILURE: {error:#}");
            return PRECONDITION_FAILURE_EXIT_CODE;
        }
    };

    match serve(&context, port, controller, requests) {
        Ok(code) => {
            tracing::info!(phase = %LifecyclePhase::Terminated, "Exiting {code}");
            code
        }
        Err(error) => {
            tracing::error!("{error:?}");
            UNEXPECTED_FAILURE_EXIT_CODE
        }
    }
}

fn select_fault_profile(arguments: &Arguments) -> FaultProfile {
    let rng = match arguments.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    FaultProfile::select(&mut RngSource::new(rng), arguments.download_requested())
}

fn serve(
    context: &Context,
    port: u16,
    controller: TerminationController,
    requests: TerminationRequests,
) -> anyhow::Result<i32> {
    runtime()?.block_on(async {
        let server = RpcServer::bind(port, context.clock).await?;
        controller.serve_until_terminated(server, requests).await
    })
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed building the Runtime")
}
