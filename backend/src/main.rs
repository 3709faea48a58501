#[macro_use]
extern crate rocket;

use log::error;
use multiview_backend::{build_rocket, config};

#[launch]
async fn rocket() -> _ {
    config::load_environment();
    config::init_logger();

    let state = match config::create_app_state().await {
        Ok(state) => state,
        Err(e) => {
            error!("Startup failed: {e:?}");
            std::process::exit(1);
        }
    };

    let cors = match config::create_cors(&state.config.cors_origin) {
        Ok(cors) => cors,
        Err(e) => {
            error!("Invalid CORS configuration: {e:?}");
            std::process::exit(1);
        }
    };

    build_rocket(state, Some(cors))
}
