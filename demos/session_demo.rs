//! Demonstration of a complete focus session without a backend.
//!
//! This example shows how to:
//! 1. Pair a device with a pairing code
//! 2. Start a session fed by simulated sensors
//! 3. Watch windows being summarized and uploaded
//! 4. Pause, resume and stop the session
//!
//! Run with: cargo run --example session_demo
//!
//! The collector here is an in-process stand-in that prints every payload
//! and fails one upload in three, so retries are visible.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use synheart_focus_agent::{
    collector::SimulatedSource,
    core::{AggregatorConfig, SensorAggregator, SensorSampleRequest},
    gateway::{CollectorApi, GatewayError, SampleReceipt, StartedSession},
    session::{AuthToken, ControllerSettings, SessionController, SessionStore},
    transparency::create_shared_log,
    upload::{NetworkStatus, UploadConfig, UploadOutcome, UploadPipeline},
    PRIVACY_DECLARATION,
};

struct LoopbackCollector {
    uploads: AtomicUsize,
}

#[async_trait]
impl CollectorApi for LoopbackCollector {
    async fn verify_code(
        &self,
        code: &str,
        device_id: &str,
        _device_type: &str,
    ) -> Result<AuthToken, GatewayError> {
        println!("[collector] verify_code {code} from {device_id}");
        Ok(AuthToken {
            jwt: "demo-jwt".to_string(),
            user_id: "demo-user".to_string(),
        })
    }

    async fn start_session(
        &self,
        _bearer_token: &str,
        _device_type: &str,
    ) -> Result<StartedSession, GatewayError> {
        Ok(StartedSession {
            session_id: format!("demo-{}", uuid::Uuid::new_v4().simple()),
            started_at: None,
            message: None,
        })
    }

    async fn ingest_sample(
        &self,
        _bearer_token: &str,
        sample: &SensorSampleRequest,
    ) -> Result<SampleReceipt, GatewayError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 3 == 0 {
            return Err(GatewayError::Server {
                status: 503,
                message: "simulated outage".to_string(),
            });
        }
        println!(
            "[collector] {} hr={:?} steps={:?} activity={:?}",
            sample.timestamp, sample.heart_rate, sample.steps, sample.activity_level
        );
        Ok(SampleReceipt {
            success: true,
            sample_id: Some(format!("sample-{n}")),
            message: None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Synheart Focus Agent - Session Demo");
    println!("===================================");
    println!("{PRIVACY_DECLARATION}");

    let log = create_shared_log();
    let api: Arc<dyn CollectorApi> = Arc::new(LoopbackCollector {
        uploads: AtomicUsize::new(0),
    });
    let aggregator = Arc::new(SensorAggregator::new(
        AggregatorConfig::default(),
        Arc::new(SimulatedSource::default()),
        log.clone(),
    ));
    let upload = UploadConfig {
        base_delay: Duration::from_secs(1),
        ..UploadConfig::default()
    };
    let pipeline = UploadPipeline::new(api.clone(), &upload, NetworkStatus::default(), log.clone());
    pipeline.start();

    let mut outcomes = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(outcome) = outcomes.recv().await {
            if let UploadOutcome::Retrying { attempt, delay, .. } = outcome {
                println!("[agent] upload failed, retry {attempt} in {delay:?}");
            }
        }
    });

    let controller = SessionController::new(
        api,
        Arc::new(SessionStore::in_memory()),
        aggregator,
        pipeline.clone(),
        ControllerSettings::new("watch-demo-0001"),
    );

    let session = controller.submit_pairing_code("123456").await?;
    println!("Session {} active", session.session_id);

    tokio::time::sleep(Duration::from_secs(10)).await;
    controller.pause()?;
    println!("Paused for 6s; nothing is uploaded");
    tokio::time::sleep(Duration::from_secs(6)).await;
    controller.resume()?;
    println!("Resumed");
    tokio::time::sleep(Duration::from_secs(10)).await;

    controller.stop()?;
    pipeline.shutdown().await;

    println!();
    println!("{}", log.summary());
    Ok(())
}
