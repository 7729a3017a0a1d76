// Thin HTTP transport: no TLS, no CORS, no UI-serving. Grounded on the
// teacher's App/HttpServer skeleton, stripped to the control-plane surface
// this daemon actually needs.

use actix_web::{middleware, web, App, HttpServer};

use crate::web::{api, SharedState};

pub async fn run(listen_addr: &str, state: SharedState) -> std::io::Result<()> {
    log::info!("http control plane listening on {listen_addr}");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Compress::default())
            .service(api::apply)
            .service(api::status)
    })
    .bind(listen_addr)?
    .run()
    .await
}
