use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

pub use common_service_operator::{self, engine::Engine, telemetry, Settings, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Namespace the operator and the master CommonService live in
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    operator_namespace: String,

    /// Namespace the aggregated OperandConfig is published to
    #[arg(long, env = "SERVICES_NAMESPACE")]
    services_namespace: Option<String>,

    #[arg(long, env = "SCOPE_MAPPING_NAMESPACE", default_value = "kube-public")]
    scope_mapping_namespace: String,

    #[arg(long, env = "SCOPE_MAPPING_NAME", default_value = "common-service-maps")]
    scope_mapping_name: String,

    /// Namespace cluster-scoped state moves to when the scope shrinks
    #[arg(long, env = "CONTROL_NAMESPACE", default_value = "cs-control")]
    control_namespace: String,

    #[arg(
        long,
        env = "FLEET_CONTROLLER",
        default_value = "operand-deployment-lifecycle-manager"
    )]
    fleet_controller: String,

    #[arg(long, env = "FLEET_SUBSCRIPTION", default_value = "ibm-odlm")]
    fleet_subscription: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    log_format: telemetry::LogFormat,
}

impl Arguments {
    fn settings(self) -> Settings {
        let mut settings = Settings::new(self.operator_namespace);
        if let Some(services_namespace) = self.services_namespace {
            settings.services_namespace = services_namespace;
        }
        settings.scope_mapping_namespace = self.scope_mapping_namespace;
        settings.scope_mapping_name = self.scope_mapping_name;
        settings.control_namespace = self.control_namespace;
        settings.fleet_controller = self.fleet_controller;
        settings.fleet_subscription = self.fleet_subscription;
        settings
    }
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Arguments = Arguments::parse();
    telemetry::init(args.log_format)?;

    // Static tables are parsed once; a broken table stops the process here
    let engine = Engine::builtin()?;
    let state = State::new(args.settings(), engine);
    let controller = common_service_operator::controllers::run(state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind("0.0.0.0:8080")?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
