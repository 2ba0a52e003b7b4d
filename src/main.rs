pub mod app;
pub mod renderer;

use color_eyre::Result;
use winit::event_loop::EventLoop;
use app::App;
use renderer::config::RenderConfig;
use renderer::Renderer;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::from_env()?;

    if config.list_gpus {
        for info in Renderer::list_gpus(config.validation_mode())? {
            println!("{}", info);
        }
        return Ok(());
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
