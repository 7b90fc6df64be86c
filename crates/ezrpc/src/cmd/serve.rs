use std::sync::Arc;

use ezrpc::remote::{ErrorObject, HookRegistry, RemoteConfig, Server};
#[cfg(feature = "schema")]
use ezrpc::schema::{RegistryConfig, SchemaRegistry};
use ezrpc::transport::Listener;
use serde::Serialize;
use serde_json::Value;

use crate::cmd::{parse_endpoint, ServeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_fields, OutputFormat};

#[derive(Serialize)]
struct Listening {
    event: &'static str,
    endpoint: String,
    transport: &'static str,
    methods: Vec<String>,
}

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let config = remote_config(&args)?;

    let hooks = Arc::new(demo_hooks());
    let server = Server::with_config(Arc::clone(&hooks), config);
    let listener = Listener::bind(&endpoint)
        .await
        .map_err(|err| transport_error("bind failed", err))?;
    let bound = listener
        .local_endpoint()
        .map_err(|err| transport_error("bind failed", err))?;

    print_fields(
        &Listening {
            event: "listening",
            endpoint: bound.to_string(),
            transport: listener.transport_name(),
            methods: hooks.methods(ezrpc::remote::HookKind::Request),
        },
        format,
    );

    tokio::select! {
        _ = server.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
            server.shutdown("server stopping").await;
        }
    }
    Ok(SUCCESS)
}

#[cfg(feature = "schema")]
fn remote_config(args: &ServeArgs) -> CliResult<RemoteConfig> {
    let config = RemoteConfig::default();
    let Some(dir) = &args.validate else {
        return Ok(config);
    };
    let registry = SchemaRegistry::from_directory_with_config(
        dir,
        RegistryConfig::default()
            .with_strict_mode(true)
            .with_fail_on_missing_schema(false),
    )
    .map_err(|err| {
        crate::exit::CliError::new(
            crate::exit::DATA_INVALID,
            format!("schema load failed: {err}"),
        )
    })?;
    tracing::info!(schemas = registry.len(), dir = %dir.display(), "params validation enabled");
    Ok(config.with_schema(Arc::new(registry)))
}

#[cfg(not(feature = "schema"))]
fn remote_config(args: &ServeArgs) -> CliResult<RemoteConfig> {
    if args.validate.is_some() {
        return Err(crate::exit::CliError::new(
            crate::exit::USAGE,
            "--validate requires the schema feature",
        ));
    }
    Ok(RemoteConfig::default())
}

/// `echo` returns its params, `sum` adds integers, `log` prints a line.
pub fn demo_hooks() -> HookRegistry {
    let hooks = HookRegistry::new();
    hooks.on_request("echo", |_, params| async move { Ok(params.unwrap_or(Value::Null)) });
    hooks.on_request_typed("sum", |_, numbers: Vec<i64>| async move {
        numbers
            .iter()
            .try_fold(0i64, |total, n| total.checked_add(*n))
            .ok_or_else(|| ErrorObject::invalid_params("sum overflows a 64-bit integer"))
    });
    hooks.on_notification("log", |remote, params| async move {
        let line = match params {
            Some(Value::String(line)) => line,
            Some(Value::Object(fields)) => match fields.get("line") {
                Some(Value::String(line)) => line.clone(),
                _ => Value::Object(fields).to_string(),
            },
            Some(other) => other.to_string(),
            None => String::new(),
        };
        tracing::info!(remote = %remote.id(), line = %line, "log");
        Ok(())
    });
    hooks
}
