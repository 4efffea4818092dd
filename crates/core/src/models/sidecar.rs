use std::fmt;

use super::event::DispatchEvent;

const SENSITIVE_MARKERS: [&str; 4] = ["key", "secret", "password", "token"];

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Credentials issued by the queue listener so dispatched work can call
/// back into the platform's messaging layer.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AccessKeys {
    pub key_name: String,
    pub key: String,
    /// Queue endpoint without embedded credentials.
    pub endpoint: String,
    pub queue: String,
}

impl fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeys")
            .field("key_name", &self.key_name)
            .field("key", &"***")
            .field("endpoint", &self.endpoint)
            .field("queue", &self.queue)
            .finish()
    }
}

/// Arguments injected into every dispatched workload's sidecar.
///
/// Built once at startup and shared read-only by every dispatch; the only
/// way to add entries is the consuming [`SidecarArgs::with`] used during
/// construction.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SidecarArgs {
    entries: Vec<(String, String)>,
}

impl SidecarArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_cli_args(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("--{k}={v}"))
            .collect()
    }

    /// Shared args followed by the per-event context args.
    pub fn for_event(&self, event: &DispatchEvent) -> Vec<String> {
        let mut args = self.to_cli_args();
        args.push(format!("--context.eventid={}", event.context.event_id));
        args.push(format!(
            "--context.correlationid={}",
            event.context.correlation_id
        ));
        if !event.context.parent_event_id.is_empty() {
            args.push(format!(
                "--context.parenteventid={}",
                event.context.parent_event_id
            ));
        }
        args.push(format!("--context.eventtype={}", event.event_type));
        args
    }
}

impl fmt::Debug for SidecarArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in &self.entries {
            if is_sensitive(k) && !v.is_empty() {
                map.entry(k, &"***");
            } else {
                map.entry(k, v);
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: &str) -> DispatchEvent {
        DispatchEvent::from_payload(payload.as_bytes()).unwrap()
    }

    #[test]
    fn test_cli_args_keep_insertion_order() {
        let args = SidecarArgs::new()
            .with("context.name", "thumbnailer")
            .with("serverport", "8080");

        assert_eq!(
            args.to_cli_args(),
            vec!["--context.name=thumbnailer", "--serverport=8080"]
        );
        assert_eq!(args.get("serverport"), Some("8080"));
        assert_eq!(args.get("missing"), None);
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_for_event_appends_context() {
        let args = SidecarArgs::new().with("context.name", "thumbnailer");
        let ev = event(
            r#"{"eventType":"ingest","context":{"eventId":"e1","correlationId":"c1","parentEventId":"p1"}}"#,
        );

        assert_eq!(
            args.for_event(&ev),
            vec![
                "--context.name=thumbnailer",
                "--context.eventid=e1",
                "--context.correlationid=c1",
                "--context.parenteventid=p1",
                "--context.eventtype=ingest",
            ]
        );
    }

    #[test]
    fn test_debug_masks_secrets() {
        let args = SidecarArgs::new()
            .with("servicebus.key", "s3cr3t")
            .with("sharedsecret", "hunter2")
            .with("context.name", "mod");
        let rendered = format!("{args:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("mod"));

        let keys = AccessKeys {
            key_name: "dispatcher".to_string(),
            key: "very-secret".to_string(),
            endpoint: "amqp://broker:5672/".to_string(),
            queue: "work".to_string(),
        };
        assert!(!format!("{keys:?}").contains("very-secret"));
    }
}
