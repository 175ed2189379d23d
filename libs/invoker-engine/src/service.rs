//! Invocation Service - composition root of the execution core
//!
//! Checks whether the image is already local (audit hint only, the pipeline
//! pulls regardless), runs the pipeline, frames stdout and records exactly one
//! audit event per call, including calls whose future is dropped midway.
//! Failures are logged where they happen and carried by the audit event.

use crate::audit::AuditRecorder;
use crate::context::{ContextError, InvocationContext};
use crate::error::ExecError;
use crate::framing::{frame_response, FramedResponse};
use crate::gateway::ContainerGateway;
use crate::pipeline::ExecutionPipeline;
use invoker_common::types::InvocationRequest;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct InvocationService {
    pipeline: ExecutionPipeline,
    audit: AuditRecorder,
}

impl InvocationService {
    pub fn new(pipeline: ExecutionPipeline, audit: AuditRecorder) -> Self {
        Self { pipeline, audit }
    }

    pub fn gateway(&self) -> &Arc<dyn ContainerGateway> {
        self.pipeline.gateway()
    }

    #[instrument(
        skip_all,
        fields(image = %request.image, method = request.mode.method())
    )]
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        ctx: &InvocationContext,
    ) -> Result<FramedResponse, ExecError> {
        let image = request.image.to_string();

        let exists = ctx
            .run(async { Ok::<_, ContextError>(self.gateway().image_exists(&image).await) })
            .await
            .unwrap_or(false);
        let audit = self.audit.open(request, exists);
        let invocation_id = audit.invocation_id();

        let outcome = match self.pipeline.run(&image, &request.mode, ctx).await {
            Ok(output) => frame_response(&output.stdout),
            Err(e) => Err(e),
        };

        audit.finish(&outcome);

        if let Ok(response) = &outcome {
            info!(
                invocation_id = ?invocation_id,
                content_type = response.content_type(),
                body_bytes = response.body().len(),
                image_exists_in_local = exists,
                "invocation succeeded"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{GatewayCall, RecordingAuditSink, ScriptedGateway, SCRIPTED_CONTAINER_ID};
    use invoker_common::types::{ImageReference, InvocationMode};

    fn service_with(gateway: ScriptedGateway) -> (InvocationService, Arc<ScriptedGateway>, Arc<RecordingAuditSink>) {
        let gateway = Arc::new(gateway);
        let sink = Arc::new(RecordingAuditSink::default());
        let service = InvocationService::new(
            ExecutionPipeline::new(gateway.clone()),
            AuditRecorder::new(sink.clone(), 8),
        );
        (service, gateway, sink)
    }

    fn get_request(name: &str) -> InvocationRequest {
        InvocationRequest::new(
            ImageReference::new("registry.local", name, "1.0.0"),
            InvocationMode::from_query("format=html"),
        )
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let (service, gateway, sink) = service_with(
            ScriptedGateway::new()
                .with_image_exists(true)
                .with_stdout("Content-Type: text/html\nContent-Length: 16\n\n<html>...</html>"),
        );

        let response = service
            .invoke(&get_request("formats"), &InvocationContext::background())
            .await
            .unwrap();

        assert_eq!(response.body(), b"<html>...</html>");
        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(
            gateway.calls()[0],
            GatewayCall::ImageExists("registry.local/formats:1.0.0".to_string())
        );
        assert_eq!(gateway.remove_count(), 1);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].error.is_empty());
        assert!(events[0].image_exists_in_local);
        assert_eq!(events[0].image, "formats");
        assert_eq!(events[0].tag, "1.0.0");
        assert_eq!(events[0].method, "GET");
        assert_eq!(events[0].content.as_deref(), Some("<html>.."));
    }

    #[tokio::test]
    async fn test_invoke_pull_failure_is_not_found() {
        let (service, gateway, sink) = service_with(ScriptedGateway::new().fail_pull("no such image"));

        let err = service
            .invoke(&get_request("missing"), &InvocationContext::background())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "image not found, no such image");
        assert_eq!(gateway.create_count(), 0);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, "image not found, no such image");
        assert_eq!(events[0].error_kind, Some(ErrorKind::ImageNotFound));
    }

    #[tokio::test]
    async fn test_invoke_create_failure_message() {
        let (service, _gateway, _sink) =
            service_with(ScriptedGateway::new().fail_create("/bin/sh executable not found"));
        let request = InvocationRequest::new(
            ImageReference::new("", "alpine", "3.19"),
            InvocationMode::from_query("json"),
        );

        let err = service
            .invoke(&request, &InvocationContext::background())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CreateFailed);
        assert_eq!(
            err.to_string(),
            "could not create a new container for image alpine:3.19 because: /bin/sh executable not found"
        );
    }

    #[tokio::test]
    async fn test_invoke_framing_failure_is_audited() {
        let (service, gateway, sink) = service_with(ScriptedGateway::new().with_stdout("hello"));

        let err = service
            .invoke(&get_request("plain"), &InvocationContext::background())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingContentType);
        assert_eq!(gateway.remove_count(), 1);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].error_kind, Some(ErrorKind::MissingContentType));
    }

    #[tokio::test]
    async fn test_invoke_post_uses_env() {
        let (service, gateway, sink) =
            service_with(ScriptedGateway::new().with_stdout("Content-Type: application/json\n\n{}"));
        let request = InvocationRequest::new(
            ImageReference::new("registry.local", "echo", "2.0.0"),
            InvocationMode::from_post_body(r#"{"name":"x"}"#),
        );

        service
            .invoke(&request, &InvocationContext::background())
            .await
            .unwrap();

        let created = gateway
            .calls()
            .into_iter()
            .find_map(|call| match call {
                GatewayCall::Create(spec) => Some(spec),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            created.mode,
            InvocationMode::Env(vec![r#"POST_DATA={"name":"x"}"#.to_string()])
        );
        assert_eq!(sink.events()[0].method, "POST");
        assert_eq!(
            gateway.calls().last(),
            Some(&GatewayCall::Remove(SCRIPTED_CONTAINER_ID.to_string()))
        );
    }

    #[tokio::test]
    async fn test_aborted_invocation_is_audited_once() {
        let (service, gateway, sink) = service_with(ScriptedGateway::new().hang_wait());

        let task = tokio::spawn(async move {
            service
                .invoke(&get_request("slow"), &InvocationContext::background())
                .await
        });

        while !gateway.calls().contains(&GatewayCall::Wait(SCRIPTED_CONTAINER_ID.to_string())) {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        // removal is spawned from the pipeline's drop path
        for _ in 0..10 {
            if gateway.remove_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.remove_count(), 1);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].image, "slow");
        assert_eq!(events[0].error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(events[0].error, "invocation abandoned before completion");
    }
}
