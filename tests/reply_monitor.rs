mod support;

use std::time::Duration;

use tokio::sync::oneshot;

use gestor_versiones_lib::core::host::MailReply;
use gestor_versiones_lib::core::reply_monitor::ReplyMonitor;

use support::*;

const SUBJECT: &str = "SOLICITUD DE FIRMA V1.1.0_240101 T | X";

fn reply(subject: &str, body: &str) -> MailReply {
    MailReply {
        subject: subject.to_string(),
        body: body.to_string(),
        from: Some("Firmas".to_string()),
        received_time: None,
    }
}

#[tokio::test]
async fn check_once_ignores_unrelated_and_pending_replies() {
    let host = FakeHost::new(CompileMode::Constant {
        bin: BIN.to_string(),
        content: String::new(),
    });
    host.state.lock().unwrap().replies = vec![
        reply("RE: otra cosa", "Aprobado"),
        reply(&format!("RE: {SUBJECT}"), "Lo revisamos mañana"),
    ];
    let monitor = ReplyMonitor::new(&host, SUBJECT);

    assert_eq!(monitor.check_once().await.unwrap(), None);
}

#[tokio::test]
async fn run_returns_once_approval_arrives() {
    let host = FakeHost::new(CompileMode::Constant {
        bin: BIN.to_string(),
        content: String::new(),
    });
    let monitor = ReplyMonitor::new(&host, SUBJECT).with_interval(Duration::from_millis(10));
    let (_cancel_tx, cancel_rx) = oneshot::channel();

    let (approved, ()) = tokio::join!(monitor.run(cancel_rx), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        host.state
            .lock()
            .unwrap()
            .replies
            .push(reply(&format!("RE: {SUBJECT}"), "Versión aprobada"));
    });

    assert_eq!(approved.unwrap().body, "Versión aprobada");
}

#[tokio::test]
async fn run_stops_when_cancelled() {
    let host = FakeHost::new(CompileMode::Constant {
        bin: BIN.to_string(),
        content: String::new(),
    });
    let monitor = ReplyMonitor::new(&host, SUBJECT).with_interval(Duration::from_millis(10));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    cancel_tx.send(()).unwrap();

    assert_eq!(monitor.run(cancel_rx).await, None);
}
