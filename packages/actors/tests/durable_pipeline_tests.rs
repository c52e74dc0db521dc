#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;

use actors::{Extraction, FnExtractor, start_pipeline};
use calendar_core::QueueMessage;
use db::repositories::MessageRepository;

#[tokio::test]
async fn surreal_backed_pipeline_retries_and_dead_letters() -> Result<(), Box<dyn Error>> {
    let _guard = common::setup_db().await?;
    common::init_tracing();

    let extractor = FnExtractor::new(|message: &QueueMessage| {
        let fail = message.email_content.contains("unreadable");
        Box::pin(async move {
            if fail {
                Err("could not find a date".into())
            } else {
                Ok(Extraction::new("scheduled"))
            }
        })
    });

    let config = common::fast_config()
        .with_broker_uri("mem://")
        .with_queues("durable_events", "durable_events_dlq")
        .with_max_retries(1);
    let pipeline = start_pipeline(config.clone(), Arc::new(extractor)).await?;

    pipeline
        .publish_email_event("Team lunch Thursday 12:30", "dana")
        .await?;
    pipeline
        .publish_email_event("unreadable scribbles", "dana")
        .await?;

    let stats = common::wait_for_stats(&pipeline, |s| {
        s.acknowledged == 1 && s.dead_lettered == 1
    })
    .await?;
    assert_eq!(stats.published, 2);
    assert_eq!(stats.retries_scheduled, 1);

    assert!(MessageRepository::list(&config.work_queue, None).await?.is_empty());
    let dead = MessageRepository::list(&config.dead_letter_queue, None).await?;
    assert_eq!(dead.len(), 1);
    let message = QueueMessage::decode(&dead[0].body)?;
    assert_eq!(message.email_content, "unreadable scribbles");
    assert_eq!(message.retry_count, 1);

    pipeline.close().await?;
    Ok(())
}
