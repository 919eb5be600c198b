mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{expected_text, units, MockClient, RecordingProgress, COMPLETION_TOKENS, PROMPT_TOKENS};
use subtitle_ocr::error::{CancelCause, OcrError};
use subtitle_ocr::services::RequestBuilder;
use subtitle_ocr::{BatchOrchestrator, ChunkLimits, JobStatus, NoopProgress, ProgressEvent};
use tokio_util::sync::CancellationToken;

fn orchestrator(client: Arc<MockClient>, max_requests: usize) -> BatchOrchestrator {
    BatchOrchestrator::new(
        client,
        Arc::new(NoopProgress),
        RequestBuilder::new("gpt-4o", false),
        ChunkLimits {
            max_requests,
            max_bytes: 10_000_000,
        },
    )
    .with_poll_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn test_results_are_ordered_across_chunks() {
    let client = MockClient::new();
    let results = orchestrator(client.clone(), 2)
        .run(&units(5), &CancellationToken::new())
        .await
        .expect("批处理应该成功");

    assert_eq!(client.uploaded_chunks(), vec![vec![0, 1], vec![2, 3], vec![4]]);
    assert_eq!(results.len(), 5);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.text, expected_text(i));
        assert_eq!(result.end_time, Duration::from_secs(i as u64) + Duration::from_millis(800));
    }
    assert_eq!(results.usage.prompt, 5 * PROMPT_TOKENS);
    assert_eq!(results.usage.completion, 5 * COMPLETION_TOKENS);

    // 输入文件和输出文件各删除一次
    assert_eq!(
        client.deletes(),
        vec!["file-in-0", "file-in-1", "file-in-2", "file-out-0", "file-out-1", "file-out-2"]
    );
    assert!(client.cancels().is_empty());
}

#[tokio::test]
async fn test_failed_job_cancels_the_others() {
    let client = MockClient::new();
    client.script_job(0, vec!["in_progress"]);
    client.script_job(1, vec!["in_progress", "failed"]);
    client.script_job(2, vec!["in_progress"]);

    let err = orchestrator(client.clone(), 2)
        .run(&units(5), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        OcrError::JobTerminal {
            chunk,
            job_id,
            status,
            ..
        } => {
            assert_eq!(chunk, 1);
            assert_eq!(job_id, "batch-1");
            assert_eq!(status, JobStatus::Failed);
        }
        other => panic!("应该返回任务失败错误: {:?}", other),
    }
    assert_eq!(client.cancels(), vec!["batch-0", "batch-2"]);
    assert_eq!(
        client.deletes(),
        vec!["file-err-1", "file-in-0", "file-in-1", "file-in-2"]
    );
}

#[tokio::test]
async fn test_expired_and_cancelled_jobs_abort() {
    for status in ["expired", "cancelled"] {
        let client = MockClient::new();
        client.script_job(0, vec![status]);

        let err = orchestrator(client.clone(), 10)
            .run(&units(3), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(&err, OcrError::JobTerminal { status: s, .. } if s.as_str() == status),
            "{}: {:?}",
            status,
            err
        );
        assert!(client.cancels().is_empty(), "终态任务不需要再取消");
        assert_eq!(client.deletes(), vec!["file-in-0"]);
    }
}

#[tokio::test]
async fn test_unknown_status_is_fatal() {
    let client = MockClient::new();
    client.script_job(0, vec!["paused"]);

    let err = orchestrator(client.clone(), 10)
        .run(&units(2), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        OcrError::UnexpectedJobStatus { job_id, raw } => {
            assert_eq!(job_id, "batch-0");
            assert_eq!(raw, "paused");
        }
        other => panic!("应该返回未知状态错误: {:?}", other),
    }
    // 本地仍认为任务在校验中，所以会请求取消
    assert_eq!(client.cancels(), vec!["batch-0"]);
    assert_eq!(client.deletes(), vec!["file-in-0"]);
}

#[tokio::test]
async fn test_status_regression_is_ignored() {
    let client = MockClient::new();
    client.script_job(0, vec!["in_progress", "validating", "completed"]);
    let progress = RecordingProgress::new();

    let results = BatchOrchestrator::new(
        client.clone(),
        progress.clone(),
        RequestBuilder::new("gpt-4o", false),
        ChunkLimits::default(),
    )
    .with_poll_interval(Duration::from_millis(5))
    .run(&units(3), &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(results.len(), 3);
    let transitions: Vec<(JobStatus, JobStatus)> = progress
        .events()
        .into_iter()
        .map(|event| match event {
            ProgressEvent::JobStatusChanged { from, to, .. } => (from, to),
            other => panic!("批处理模式不应出现 {:?}", other),
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (JobStatus::Validating, JobStatus::InProgress),
            (JobStatus::InProgress, JobStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn test_duplicate_tag_is_a_parse_error() {
    let client = MockClient::new();
    client.override_output(
        0,
        [MockClient::output_line_for(0), MockClient::output_line_for(0)].join("\n"),
    );

    let err = orchestrator(client.clone(), 10)
        .run(&units(2), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::Parse { .. }), "{:?}", err);
    assert_eq!(client.deletes(), vec!["file-in-0", "file-out-0"]);
}

#[tokio::test]
async fn test_out_of_range_tag_is_a_parse_error() {
    let client = MockClient::new();
    client.override_output(
        0,
        [MockClient::output_line_for(0), MockClient::output_line_for(99)].join("\n"),
    );

    let err = orchestrator(client, 10)
        .run(&units(2), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::Parse { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_missing_result_is_reported() {
    let client = MockClient::new();
    client.override_output(0, MockClient::output_line_for(0));

    let err = orchestrator(client, 10)
        .run(&units(2), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::Parse { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_failed_request_inside_output() {
    let client = MockClient::new();
    let failed = r#"{"custom_id":"1","response":null,"error":{"code":"server_error","message":"boom"}}"#;
    client.override_output(0, [MockClient::output_line_for(0), failed.to_string()].join("\n"));

    let err = orchestrator(client, 10)
        .run(&units(2), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        OcrError::Recognition { index, .. } => assert_eq!(index, 1),
        other => panic!("应该返回识别错误: {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_failure_does_not_fail_the_run() {
    let client = MockClient::new();
    client.fail_delete("file-in-0");
    client.fail_delete("file-out-0");

    let results = orchestrator(client.clone(), 10)
        .run(&units(3), &CancellationToken::new())
        .await
        .expect("删除失败不应影响结果");

    assert_eq!(results.len(), 3);
    assert_eq!(client.deletes(), vec!["file-in-0", "file-out-0"]);
}

#[tokio::test]
async fn test_cancellation_while_polling() {
    let client = MockClient::new();
    for job in 0..2 {
        client.script_job(job, vec!["in_progress"]);
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = orchestrator(client.clone(), 2)
        .run(&units(4), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OcrError::Cancelled {
            cause: CancelCause::Interrupted,
            ..
        }
    ));
    assert_eq!(client.cancels(), vec!["batch-0", "batch-1"]);
    assert_eq!(client.deletes(), vec!["file-in-0", "file-in-1"]);
}

#[tokio::test]
async fn test_max_wait_times_out() {
    let client = MockClient::new();
    client.script_job(0, vec!["in_progress"]);

    let err = orchestrator(client.clone(), 10)
        .with_max_wait(Some(Duration::from_millis(30)))
        .run(&units(2), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OcrError::Cancelled {
            cause: CancelCause::TimedOut,
            ..
        }
    ));
    assert_eq!(client.cancels(), vec!["batch-0"]);
    assert_eq!(client.deletes(), vec!["file-in-0"]);
}

#[tokio::test]
async fn test_empty_input_touches_nothing() {
    let client = MockClient::new();
    let results = orchestrator(client.clone(), 10)
        .run(&[], &CancellationToken::new())
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(client.uploads(), 0);
    assert!(client.deletes().is_empty());
}

fn assert_transport_in_chunk(err: &OcrError, chunk: usize) {
    match err {
        OcrError::Transport { operation, .. } => assert!(
            operation.contains(&format!("第 {} 块", chunk)),
            "错误应标明分块: {}",
            operation
        ),
        other => panic!("应该返回远端调用错误: {:?}", other),
    }
}

#[tokio::test]
async fn test_upload_failure_cleans_up_uploaded_files() {
    let client = MockClient::new();
    client.fail_call("upload", 1);

    let err = orchestrator(client.clone(), 2)
        .run(&units(5), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_transport_in_chunk(&err, 2);
    assert!(client.cancels().is_empty(), "尚未创建任何任务");
    assert_eq!(client.deletes(), vec!["file-in-0"]);
}

#[tokio::test]
async fn test_schedule_failure_cancels_scheduled_jobs() {
    let client = MockClient::new();
    client.fail_call("schedule", 1);

    let err = orchestrator(client.clone(), 2)
        .run(&units(5), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_transport_in_chunk(&err, 2);
    assert_eq!(client.cancels(), vec!["batch-0"]);
    assert_eq!(client.deletes(), vec!["file-in-0", "file-in-1", "file-in-2"]);
}

#[tokio::test]
async fn test_poll_failure_cancels_all_running_jobs() {
    let client = MockClient::new();
    client.fail_call("status", 1);

    let err = orchestrator(client.clone(), 2)
        .run(&units(5), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_transport_in_chunk(&err, 2);
    assert_eq!(client.cancels(), vec!["batch-0", "batch-1", "batch-2"]);
    assert_eq!(client.deletes(), vec!["file-in-0", "file-in-1", "file-in-2"]);
}

#[tokio::test]
async fn test_fetch_failure_still_deletes_outputs() {
    let client = MockClient::new();
    client.fail_call("fetch", 1);

    let err = orchestrator(client.clone(), 2)
        .run(&units(5), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_transport_in_chunk(&err, 2);
    assert!(client.cancels().is_empty(), "已完成的任务不需要取消");
    assert_eq!(
        client.deletes(),
        vec!["file-in-0", "file-in-1", "file-in-2", "file-out-0", "file-out-1", "file-out-2"]
    );
}
