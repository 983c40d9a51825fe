use crate::store::{FlowKey, FlowProject, WidgetConfig};
use serde_json::json;

/// Substrings of backend errors and the message the widget shows instead.
pub const FRIENDLY_ERRORS: &[(&str, &str)] = &[
    ("not active", "This chat service is currently unavailable."),
    ("Domain not allowed", "This chat isn't available on this website."),
    ("Origin required", "This chat isn't available on this website."),
    ("Invalid API key", "This chat could not be authorized."),
    ("AI provider", "The assistant is having trouble responding. Please try again shortly."),
];

pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";

pub fn friendly_error(raw: &str) -> &'static str {
    FRIENDLY_ERRORS
        .iter()
        .find(|(needle, _)| raw.contains(needle))
        .map(|(_, message)| *message)
        .unwrap_or(GENERIC_ERROR)
}

/// Query overrides for the rendered shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOptions {
    pub mode: Option<String>,
    pub theme: Option<String>,
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn pick(value: Option<&str>, allowed: &[&str], fallback: &str) -> String {
    value
        .map(str::trim)
        .filter(|value| allowed.contains(value))
        .unwrap_or(fallback)
        .to_string()
}

/// Document with no widget, served for inactive flows.
pub fn empty_shell() -> String {
    "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"></head><body></body></html>\n"
        .to_string()
}

/// `flow` is the key the page was opened with, so chat turns posted from the
/// widget pick the same snapshot the page was served for.
pub fn render_shell(
    project: &FlowProject,
    flow: &FlowKey,
    options: &ShellOptions,
    endpoint: &str,
) -> String {
    let widget: &WidgetConfig = &project.widget;
    let mode = pick(options.mode.as_deref(), &["popup", "inline", "fullscreen"], &widget.mode);
    let theme = pick(options.theme.as_deref(), &["light", "dark"], &widget.theme);

    let config = json!({
        "flow": flow.as_str(),
        "endpoint": endpoint,
        "title": widget.title,
        "greeting": widget.greeting,
        "placeholder": widget.placeholder,
        "mode": mode,
        "theme": theme,
        "friendlyErrors": FRIENDLY_ERRORS
            .iter()
            .map(|(needle, message)| json!({"match": needle, "message": message}))
            .collect::<Vec<_>>(),
        "genericError": GENERIC_ERROR,
    });
    // Keep `</script>` inside string values from closing the tag.
    let config = config.to_string().replace("</", "<\\/");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body class="flowchat-{mode} flowchat-theme-{theme}">
<div id="flowchat-root" data-mode="{mode}" data-theme="{theme}"></div>
<script id="flowchat-config" type="application/json">{config}</script>
<script>
(function () {{
  var config = JSON.parse(document.getElementById("flowchat-config").textContent);
  var history = [];
  var sessionId = "s-" + Date.now().toString(36) + Math.random().toString(36).slice(2, 10);
  var root = document.getElementById("flowchat-root");
  var log = document.createElement("div");
  var form = document.createElement("form");
  var input = document.createElement("input");
  input.placeholder = config.placeholder;
  form.appendChild(input);
  root.appendChild(log);
  root.appendChild(form);

  function friendly(raw) {{
    for (var i = 0; i < config.friendlyErrors.length; i++) {{
      if (String(raw).indexOf(config.friendlyErrors[i].match) !== -1) return config.friendlyErrors[i].message;
    }}
    return config.genericError;
  }}
  function show(role, text) {{
    var line = document.createElement("p");
    line.className = "flowchat-" + role;
    line.textContent = text;
    log.appendChild(line);
  }}
  if (config.greeting) show("assistant", config.greeting);

  form.addEventListener("submit", function (event) {{
    event.preventDefault();
    var message = input.value.trim();
    if (!message) return;
    input.value = "";
    show("user", message);
    fetch(config.endpoint, {{
      method: "POST",
      headers: {{ "Content-Type": "application/json" }},
      body: JSON.stringify({{ flow: config.flow, mode: config.mode, message: message, history: history, sessionId: sessionId }})
    }})
      .then(function (res) {{ return res.json(); }})
      .then(function (data) {{
        if (data.error) {{ show("error", friendly(data.error)); return; }}
        history.push({{ role: "user", content: message }});
        history.push({{ role: "assistant", content: data.reply }});
        show("assistant", data.reply);
      }})
      .catch(function (err) {{ show("error", friendly(err)); }});
  }});
}})();
</script>
</body>
</html>
"#,
        title = escape_html(&widget.title),
        mode = escape_html(&mode),
        theme = escape_html(&theme),
        config = config,
    )
}
