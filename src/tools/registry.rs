use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub required: bool,
    pub options: &'static [&'static str],
}

const fn field(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::String,
        description,
        required: false,
        options: &[],
    }
}

const fn required(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        required: true,
        ..field(name, description)
    }
}

const fn choice(
    name: &'static str,
    description: &'static str,
    options: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        options,
        ..field(name, description)
    }
}

const fn number(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        kind: FieldKind::Number,
        ..field(name, description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSchema {
    pub node_type: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

const SLACK_FIELDS: &[FieldSpec] = &[
    required("text", "Message text to post"),
    field("channel", "Channel name or id, e.g. #general"),
    field("threadTs", "Timestamp of the thread to reply in"),
    field("blocks", "Slack Block Kit blocks as a JSON array"),
    field("webhookUrl", "Incoming webhook URL"),
    field("username", "Display name override for webhook posts"),
    field("iconEmoji", "Emoji icon override for webhook posts"),
    field("connectionMethod", "Connection method"),
    field("botToken", "Bot token"),
];

const REGISTRY: &[NodeSchema] = &[
    NodeSchema {
        node_type: "http-request",
        description: "Send an HTTP request and return the response",
        fields: &[
            required("url", "Absolute URL to call"),
            choice(
                "method",
                "HTTP method",
                crate::executor::http_request::HTTP_METHODS,
            ),
            field("headers", "Request headers as a JSON object"),
            field("body", "Request body, JSON or plain text"),
            field("apiKey", "Bearer token"),
        ],
    },
    NodeSchema {
        node_type: "slack",
        description: "Post a message to Slack",
        fields: SLACK_FIELDS,
    },
    NodeSchema {
        node_type: "slack-webhook",
        description: "Post a message to a Slack incoming webhook",
        fields: SLACK_FIELDS,
    },
    NodeSchema {
        node_type: "data-table",
        description: "Create, read, update or delete rows in a data table",
        fields: &[
            choice(
                "operation",
                "Operation to perform",
                crate::executor::data_table::OPERATIONS,
            ),
            field("tableId", "Data table id"),
            field("data", "Row values as a JSON object"),
            field("recordId", "Row id for update or delete"),
            field(
                "filters",
                "JSON array of {field, operator, value}; operators: equals, notEquals, contains",
            ),
            field("sort", "JSON object {field, direction} with direction asc or desc"),
            number("limit", "Maximum number of rows to return"),
        ],
    },
    NodeSchema {
        node_type: "gmail",
        description: "Send an email through Gmail",
        fields: &[
            required("to", "Recipient email address"),
            required("subject", "Email subject"),
            required("body", "Email body"),
            field("cc", "CC recipients, comma separated"),
            field("accessToken", "OAuth access token"),
        ],
    },
    NodeSchema {
        node_type: "send-email",
        description: "Send an email",
        fields: &[
            required("to", "Recipient email address"),
            required("subject", "Email subject"),
            required("body", "Email body"),
            field("from", "Sender address"),
            field("apiKey", "Email provider API key"),
        ],
    },
    NodeSchema {
        node_type: "discord",
        description: "Post a message to a Discord channel",
        fields: &[
            required("content", "Message content"),
            field("webhookUrl", "Discord webhook URL"),
            field("username", "Display name override"),
        ],
    },
    NodeSchema {
        node_type: "telegram",
        description: "Send a Telegram message",
        fields: &[
            required("text", "Message text"),
            field("chatId", "Target chat id"),
            field("botToken", "Bot token"),
        ],
    },
];

pub fn schema_for(node_type: &str) -> Option<&'static NodeSchema> {
    REGISTRY.iter().find(|schema| schema.node_type == node_type)
}
