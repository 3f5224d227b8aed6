use clap::Parser as _;
use log::{error, info};

use nanovm::cli::Args;
use nanovm::{load_image, Vm};

fn main() {
    let args = Args::parse();
    init_logging(&args);

    let code = match args.image_path() {
        Some(path) => path.clone(),
        None => {
            eprintln!("usage: nanovm <image> | nanovm -f <image>");
            std::process::exit(1);
        }
    };

    std::process::exit(run(&code));
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(log_path) = &args.log {
        match std::fs::File::create(log_path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!("warning: could not open log sink {log_path:?}: {err}");
            }
        }
    }
    let _ = builder.try_init();
}

fn run(path: &std::path::Path) -> i32 {
    info!("loading image {path:?}");
    let image = match load_image(path) {
        Ok(image) => image,
        Err(err) => {
            error!("failed to load image: {err}");
            return err.exit_code();
        }
    };

    let mut vm = Vm::new();
    if let Err(err) = vm.load_program(&image.code, image.entry_point) {
        error!("failed to load program into vm: {err}");
        return err.exit_code();
    }

    match vm.run() {
        Ok(()) => 0,
        Err(err) => {
            let snapshot = vm.diagnostics();
            error!(
                "execution faulted: {err} (ip={}, sp={}, csp={}, tos={:?})",
                snapshot.ip, snapshot.sp, snapshot.csp, snapshot.top_of_stack
            );
            err.exit_code()
        }
    }
}
