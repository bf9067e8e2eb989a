use serde::{Deserialize, Serialize};

/// Message content. Sent as `multipart/alternative` when both parts exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailBody {
    Text(String),
    Html(String),
    Alternative { text: String, html: String },
}

impl EmailBody {
    /// Empty strings count as absent. `None` when neither part is left.
    pub fn from_parts(text: Option<&str>, html: Option<&str>) -> Option<EmailBody> {
        let text = text.filter(|t| !t.is_empty()).map(str::to_string);
        let html = html.filter(|h| !h.is_empty()).map(str::to_string);
        match (text, html) {
            (Some(text), Some(html)) => Some(EmailBody::Alternative { text, html }),
            (Some(text), None) => Some(EmailBody::Text(text)),
            (None, Some(html)) => Some(EmailBody::Html(html)),
            (None, None) => None,
        }
    }
}

/// `"{name}" <{address}>`, escaping backslashes and quotes in the name.
pub fn display_mailbox(name: &str, address: &str) -> String {
    let name = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{name}\" <{address}>")
}

/// One message addressed to exactly one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Sender mailbox, bare or in [`display_mailbox`] form.
    pub from: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: EmailBody,
}

impl Email {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: EmailBody,
    ) -> Email {
        Email {
            from: from.into(),
            to: to.into(),
            reply_to: None,
            subject: subject.into(),
            body,
        }
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Email {
        self.reply_to = Some(address.into());
        self
    }

    /// The same message for a different recipient.
    pub fn readdressed(&self, recipient: &str) -> Email {
        Email {
            to: recipient.to_string(),
            ..self.clone()
        }
    }
}
