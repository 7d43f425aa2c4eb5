use pbr_ibl::{window, RendererConfig};

fn main() {
    env_logger::init();

    if let Err(e) = window::run(RendererConfig::default()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
