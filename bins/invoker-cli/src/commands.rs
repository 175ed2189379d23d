// CLI commands for running function images locally
use anyhow::{Context, Result};
use invoker_common::config::Config;
use invoker_common::registry::{RegistryTagResolver, TagResolver};
use invoker_common::types::{ImageReference, InvocationMode, InvocationRequest, LATEST_TAG};
use invoker_engine::{
    AuditRecorder, DockerGateway, ExecutionPipeline, InvocationContext, InvocationService,
};
use std::io::{self, Write};
use std::sync::Arc;

async fn resolve(config: &Config, image: ImageReference) -> Result<ImageReference> {
    if !image.is_latest_alias() {
        return Ok(image);
    }

    let resolver = RegistryTagResolver::new(config.registry_scheme.clone())?;
    let tag = resolver
        .resolve_latest(&image)
        .await
        .with_context(|| format!("could not resolve tag {} for {}", LATEST_TAG, image.name))?;
    Ok(image.with_tag(tag))
}

/// Build the invocation mode the HTTP routes would build for the same input
fn invocation_mode(arg: Option<String>, data: Option<String>) -> InvocationMode {
    match (arg, data) {
        (_, Some(body)) => InvocationMode::from_post_body(&body),
        (Some(query), None) => InvocationMode::from_query(&query),
        (None, None) => InvocationMode::Args(Vec::new()),
    }
}

pub async fn run_image(
    config: &Config,
    name: &str,
    tag: &str,
    arg: Option<String>,
    data: Option<String>,
    show_headers: bool,
) -> Result<()> {
    let image = resolve(config, ImageReference::new(config.registry.clone(), name, tag)).await?;
    let request = InvocationRequest::new(image, invocation_mode(arg, data));

    eprintln!("🐳 Running {} ({})", request.image, request.mode.method());

    let gateway = DockerGateway::connect().context("Failed to connect to Docker daemon")?;
    let service = InvocationService::new(
        ExecutionPipeline::new(Arc::new(gateway)).with_cleanup_timeout(config.cleanup_timeout),
        AuditRecorder::tracing(config.content_preview_chars),
    );

    let (ctx, cancel) = InvocationContext::with_timeout(config.invocation_timeout).with_cancel();
    let invocation = service.invoke(&request, &ctx);
    tokio::pin!(invocation);

    let outcome = tokio::select! {
        outcome = &mut invocation => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("⚠️  Interrupted, removing container...");
            cancel.cancel();
            invocation.await
        }
    };

    let response = outcome.with_context(|| format!("invocation of {} failed", request.image))?;

    eprintln!(
        "✅ {} ({} bytes)",
        response.content_type().unwrap_or_default(),
        response.body().len()
    );

    let mut stdout = io::stdout().lock();
    if show_headers {
        for (key, value) in response.headers() {
            writeln!(stdout, "{}: {}", key, value)?;
        }
        writeln!(stdout)?;
    }
    stdout.write_all(response.body())?;
    stdout.flush()?;

    Ok(())
}

pub async fn resolve_tag(config: &Config, name: &str) -> Result<()> {
    let image = ImageReference::new(config.registry.clone(), name, LATEST_TAG);
    let resolved = resolve(config, image).await?;
    println!("{}", resolved);
    Ok(())
}
