//! Bucket notification and object-lock configuration documents

use quick_xml::events::Event;
use std::fmt;
use std::str::FromStr;

use crate::s3::error::{Result, S3Error};
use crate::s3::xml::{new_reader, parse_number, push_element, S3_NAMESPACE};

// =============================================================================
// Notification configuration
// =============================================================================

/// Key name filter of a notification target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl KeyFilter {
    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.suffix.is_none()
    }
}

/// One queue, topic or cloud-function target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationTarget {
    pub id: Option<String>,
    pub arn: String,
    pub events: Vec<String>,
    pub filter: KeyFilter,
}

impl NotificationTarget {
    pub fn new(arn: impl Into<String>, events: &[&str]) -> Self {
        Self {
            arn: arn.into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filter.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.filter.suffix = Some(suffix.into());
        self
    }

    fn write_xml(&self, xml: &mut String, element: &str, arn_element: &str) {
        xml.push('<');
        xml.push_str(element);
        xml.push('>');
        if let Some(id) = &self.id {
            push_element(xml, "Id", id);
        }
        push_element(xml, arn_element, &self.arn);
        for event in &self.events {
            push_element(xml, "Event", event);
        }
        if !self.filter.is_empty() {
            xml.push_str("<Filter><S3Key>");
            for (name, value) in [("prefix", &self.filter.prefix), ("suffix", &self.filter.suffix)] {
                if let Some(value) = value {
                    xml.push_str("<FilterRule>");
                    push_element(xml, "Name", name);
                    push_element(xml, "Value", value);
                    xml.push_str("</FilterRule>");
                }
            }
            xml.push_str("</S3Key></Filter>");
        }
        xml.push_str("</");
        xml.push_str(element);
        xml.push('>');
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Queue,
    Topic,
    CloudFunction,
}

impl TargetKind {
    fn from_element(name: &[u8]) -> Option<Self> {
        match name {
            b"QueueConfiguration" => Some(Self::Queue),
            b"TopicConfiguration" => Some(Self::Topic),
            b"CloudFunctionConfiguration" => Some(Self::CloudFunction),
            _ => None,
        }
    }

    fn arn_element(&self) -> &'static [u8] {
        match self {
            Self::Queue => b"Queue",
            Self::Topic => b"Topic",
            Self::CloudFunction => b"CloudFunction",
        }
    }
}

/// `NotificationConfiguration` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationConfig {
    pub queue_configs: Vec<NotificationTarget>,
    pub topic_configs: Vec<NotificationTarget>,
    pub cloud_func_configs: Vec<NotificationTarget>,
}

impl NotificationConfig {
    pub fn is_empty(&self) -> bool {
        self.queue_configs.is_empty()
            && self.topic_configs.is_empty()
            && self.cloud_func_configs.is_empty()
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str("<NotificationConfiguration xmlns=\"");
        xml.push_str(S3_NAMESPACE);
        xml.push_str("\">");
        for target in &self.cloud_func_configs {
            target.write_xml(&mut xml, "CloudFunctionConfiguration", "CloudFunction");
        }
        for target in &self.queue_configs {
            target.write_xml(&mut xml, "QueueConfiguration", "Queue");
        }
        for target in &self.topic_configs {
            target.write_xml(&mut xml, "TopicConfiguration", "Topic");
        }
        xml.push_str("</NotificationConfiguration>");
        xml
    }

    pub fn from_xml(xml_data: &[u8]) -> Result<Self> {
        let mut reader = new_reader(xml_data);

        let mut config = NotificationConfig::default();
        let mut current: Option<(TargetKind, NotificationTarget)> = None;
        let mut rule_name = String::new();
        let mut rule_value = String::new();
        let mut current_text = String::with_capacity(128);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    current_text.clear();
                    if let Some(kind) = TargetKind::from_element(e.local_name().as_ref()) {
                        current = Some((kind, NotificationTarget::default()));
                    }
                }
                Ok(Event::Text(e)) => {
                    current_text.clear();
                    current_text.push_str(&e.unescape()?);
                }
                Ok(Event::End(e)) => {
                    let name = e.local_name();
                    let name = name.as_ref();
                    if let Some((kind, target)) = current.as_mut() {
                        match name {
                            b"Id" => target.id = Some(std::mem::take(&mut current_text)),
                            b"Event" => target.events.push(std::mem::take(&mut current_text)),
                            b"Name" => rule_name = std::mem::take(&mut current_text),
                            b"Value" => rule_value = std::mem::take(&mut current_text),
                            b"FilterRule" => {
                                let value = Some(std::mem::take(&mut rule_value));
                                match rule_name.as_str() {
                                    "prefix" => target.filter.prefix = value,
                                    "suffix" => target.filter.suffix = value,
                                    other => {
                                        return Err(S3Error::XmlParse(format!(
                                            "unknown filter rule '{}'",
                                            other
                                        )))
                                    }
                                }
                            }
                            n if n == kind.arn_element() => {
                                target.arn = std::mem::take(&mut current_text);
                            }
                            _ => {}
                        }
                    }
                    if TargetKind::from_element(name).is_some() {
                        if let Some((kind, target)) = current.take() {
                            match kind {
                                TargetKind::Queue => config.queue_configs.push(target),
                                TargetKind::Topic => config.topic_configs.push(target),
                                TargetKind::CloudFunction => config.cloud_func_configs.push(target),
                            }
                        }
                    }
                    current_text.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(S3Error::XmlParse(e.to_string())),
                _ => {}
            }
        }

        Ok(config)
    }
}

/// Canonical text form, stable across XML round trips
impl fmt::Display for NotificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = [
            ("cloud-function", &self.cloud_func_configs),
            ("queue", &self.queue_configs),
            ("topic", &self.topic_configs),
        ];
        for (label, targets) in groups {
            for target in targets {
                write!(
                    f,
                    "{} id={} arn={} events=[{}]",
                    label,
                    target.id.as_deref().unwrap_or(""),
                    target.arn,
                    target.events.join(",")
                )?;
                if let Some(prefix) = &target.filter.prefix {
                    write!(f, " prefix={}", prefix)?;
                }
                if let Some(suffix) = &target.filter.suffix {
                    write!(f, " suffix={}", suffix)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Object lock configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionMode {
    Governance,
    Compliance,
}

impl RetentionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Governance => "GOVERNANCE",
            Self::Compliance => "COMPLIANCE",
        }
    }
}

impl FromStr for RetentionMode {
    type Err = S3Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GOVERNANCE" => Ok(Self::Governance),
            "COMPLIANCE" => Ok(Self::Compliance),
            _ => Err(S3Error::XmlParse(format!("unknown retention mode '{}'", s))),
        }
    }
}

/// Default retention period, expressed in exactly one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDuration {
    Days(u32),
    Years(u32),
}

impl RetentionDuration {
    fn write_xml(&self, xml: &mut String) {
        match self {
            Self::Days(n) => push_element(xml, "Days", &n.to_string()),
            Self::Years(n) => push_element(xml, "Years", &n.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRetention {
    pub mode: RetentionMode,
    pub duration: RetentionDuration,
}

/// `ObjectLockConfiguration` document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLockConfig {
    pub enabled: bool,
    pub rule: Option<DefaultRetention>,
}

impl ObjectLockConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            rule: None,
        }
    }

    pub fn with_retention(mut self, mode: RetentionMode, duration: RetentionDuration) -> Self {
        self.rule = Some(DefaultRetention { mode, duration });
        self
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str("<ObjectLockConfiguration xmlns=\"");
        xml.push_str(S3_NAMESPACE);
        xml.push_str("\">");
        if self.enabled {
            push_element(&mut xml, "ObjectLockEnabled", "Enabled");
        }
        if let Some(rule) = &self.rule {
            xml.push_str("<Rule><DefaultRetention>");
            push_element(&mut xml, "Mode", rule.mode.as_str());
            rule.duration.write_xml(&mut xml);
            xml.push_str("</DefaultRetention></Rule>");
        }
        xml.push_str("</ObjectLockConfiguration>");
        xml
    }

    /// Parse the document; the retention variant is chosen by whichever of
    /// `Days` or `Years` is present.
    pub fn from_xml(xml_data: &[u8]) -> Result<Self> {
        let mut reader = new_reader(xml_data);

        let mut enabled = false;
        let mut mode: Option<RetentionMode> = None;
        let mut days: Option<u32> = None;
        let mut years: Option<u32> = None;
        let mut current_text = String::with_capacity(32);

        loop {
            match reader.read_event() {
                Ok(Event::Start(_)) => current_text.clear(),
                Ok(Event::Text(e)) => {
                    current_text.clear();
                    current_text.push_str(&e.unescape()?);
                }
                Ok(Event::End(e)) => {
                    match e.local_name().as_ref() {
                        b"ObjectLockEnabled" => enabled = current_text == "Enabled",
                        b"Mode" => mode = Some(current_text.parse()?),
                        b"Days" => days = Some(parse_number(&current_text, "Days")?),
                        b"Years" => years = Some(parse_number(&current_text, "Years")?),
                        _ => {}
                    }
                    current_text.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(S3Error::XmlParse(e.to_string())),
                _ => {}
            }
        }

        let duration = match (days, years) {
            (Some(n), None) => Some(RetentionDuration::Days(n)),
            (None, Some(n)) => Some(RetentionDuration::Years(n)),
            (None, None) => None,
            (Some(_), Some(_)) => {
                return Err(S3Error::XmlParse(
                    "default retention has both Days and Years".to_string(),
                ))
            }
        };

        let rule = match (mode, duration) {
            (Some(mode), Some(duration)) => Some(DefaultRetention { mode, duration }),
            (None, None) => None,
            _ => {
                return Err(S3Error::XmlParse(
                    "default retention needs both a mode and a period".to_string(),
                ))
            }
        };

        Ok(Self { enabled, rule })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_notification() -> NotificationConfig {
        NotificationConfig {
            queue_configs: vec![NotificationTarget::new(
                "arn:minio:sqs::miniojavatest:webhook",
                &["s3:ObjectCreated:Put", "s3:ObjectCreated:Copy"],
            )
            .with_id("q1")
            .with_prefix("images")
            .with_suffix("pg")],
            topic_configs: vec![NotificationTarget::new("arn:aws:sns:us-east-1:1:topic", &["s3:ObjectRemoved:*"])],
            cloud_func_configs: vec![],
        }
    }

    #[test]
    fn test_notification_round_trip() {
        let config = sample_notification();
        let parsed = NotificationConfig::from_xml(config.to_xml().as_bytes()).unwrap();
        assert_eq!(parsed.to_string(), config.to_string());
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_notification_round_trip_keeps_filter_spaces() {
        let config = NotificationConfig {
            queue_configs: vec![NotificationTarget::new("arn:minio:sqs::1:webhook", &["s3:ObjectCreated:*"])
                .with_prefix("logs ")
                .with_suffix(" .gz")],
            ..Default::default()
        };
        let parsed = NotificationConfig::from_xml(config.to_xml().as_bytes()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.queue_configs[0].filter.prefix.as_deref(), Some("logs "));
        assert_eq!(parsed.queue_configs[0].filter.suffix.as_deref(), Some(" .gz"));
    }

    #[test]
    fn test_notification_canonical_string() {
        assert_eq!(
            sample_notification().to_string(),
            "queue id=q1 arn=arn:minio:sqs::miniojavatest:webhook \
             events=[s3:ObjectCreated:Put,s3:ObjectCreated:Copy] prefix=images suffix=pg\n\
             topic id= arn=arn:aws:sns:us-east-1:1:topic events=[s3:ObjectRemoved:*]\n"
        );
    }

    #[test]
    fn test_parse_server_notification_document() {
        let xml = br#"<NotificationConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
<CloudFunctionConfiguration><Id>f1</Id><CloudFunction>arn:lambda</CloudFunction>
<Event>s3:ObjectAccessed:*</Event></CloudFunctionConfiguration>
</NotificationConfiguration>"#;
        let config = NotificationConfig::from_xml(xml).unwrap();
        assert_eq!(config.cloud_func_configs.len(), 1);
        assert_eq!(config.cloud_func_configs[0].arn, "arn:lambda");
        assert!(config.cloud_func_configs[0].filter.is_empty());
        assert!(NotificationConfig::from_xml(b"<NotificationConfiguration/>").unwrap().is_empty());
    }

    #[test]
    fn test_object_lock_variants() {
        for duration in [RetentionDuration::Days(30), RetentionDuration::Years(2)] {
            let config = ObjectLockConfig::enabled().with_retention(RetentionMode::Compliance, duration);
            let parsed = ObjectLockConfig::from_xml(config.to_xml().as_bytes()).unwrap();
            assert_eq!(parsed, config);
        }

        let config = ObjectLockConfig::enabled()
            .with_retention(RetentionMode::Governance, RetentionDuration::Years(1));
        assert!(config.to_xml().contains("<Mode>GOVERNANCE</Mode><Years>1</Years>"));
    }

    #[test]
    fn test_object_lock_rejects_ambiguous_retention() {
        let both = b"<ObjectLockConfiguration><Rule><DefaultRetention><Mode>GOVERNANCE</Mode>\
<Days>1</Days><Years>1</Years></DefaultRetention></Rule></ObjectLockConfiguration>";
        assert!(ObjectLockConfig::from_xml(both).is_err());

        let no_mode = b"<ObjectLockConfiguration><Rule><DefaultRetention><Days>1</Days>\
</DefaultRetention></Rule></ObjectLockConfiguration>";
        assert!(ObjectLockConfig::from_xml(no_mode).is_err());

        let plain = ObjectLockConfig::from_xml(
            b"<ObjectLockConfiguration><ObjectLockEnabled>Enabled</ObjectLockEnabled></ObjectLockConfiguration>",
        )
        .unwrap();
        assert_eq!(plain, ObjectLockConfig::enabled());
    }
}
