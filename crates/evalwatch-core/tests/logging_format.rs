use std::io;
use std::sync::{Arc, Mutex};

use evalwatch_core::logging::{subscriber_with_writer, LogOptions};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn json_logs_carry_structured_fields() {
    let sink = SharedBuffer::default();
    let opts = LogOptions {
        json: true,
        default_directive: "info".to_string(),
    };
    let subscriber = subscriber_with_writer(&opts, sink.clone());

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(
            metric = "toxicity",
            model_id = "gpt-x",
            event_id = "evt-1",
            passed = false,
            "evaluation recorded"
        );
        tracing::debug!("filtered out at info");
    });

    let bytes = sink.0.lock().expect("lock output").clone();
    let text = String::from_utf8(bytes).expect("utf8 log output");
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("json log line");

    assert_eq!(parsed.get("level").and_then(|v| v.as_str()), Some("INFO"));
    let fields = parsed.get("fields").expect("fields object");
    assert_eq!(
        fields.get("metric").and_then(|v| v.as_str()),
        Some("toxicity")
    );
    assert_eq!(fields.get("passed").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        fields.get("message").and_then(|v| v.as_str()),
        Some("evaluation recorded")
    );
}
