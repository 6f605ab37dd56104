//! The letter, rendered as a self-contained HTML email.

use sealpost_core::{
    domain::Letter,
    formatting::{escape_html, html_paragraph, written_date},
};

/// Render `letter` into the fixed "paper" template.
///
/// All user-supplied text is escaped; the body keeps its line breaks.
pub fn render_letter_html(letter: &Letter, app_url: &str) -> String {
    let salutation = escape_html(letter.salutation.trim());
    let body = html_paragraph(letter.body.trim_end());
    let sign_off = html_paragraph(letter.sign_off.trim());
    let written = escape_html(&written_date(letter.created_at));
    let app_url = escape_html(app_url);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>A letter from your past self</title>
</head>
<body style="margin:0;padding:0;background:#efe9df;font-family:Georgia,'Times New Roman',serif;color:#2b2620;">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background:#efe9df;">
    <tr><td align="center" style="padding:32px 12px;">
      <table role="presentation" width="600" cellpadding="0" cellspacing="0" style="max-width:600px;width:100%;">
        <tr><td style="background:#7a2e2e;color:#fdf8f0;padding:14px 24px;font-size:14px;letter-spacing:2px;text-transform:uppercase;border-radius:6px 6px 0 0;">
          &#9993; Sealpost
        </td></tr>
        <tr><td style="background:#fffdf8;padding:40px 36px;border:1px solid #e2d9c8;border-top:none;border-radius:0 0 6px 6px;box-shadow:0 2px 6px rgba(0,0,0,0.06);">
          <p style="margin:0 0 24px;font-size:19px;">{salutation}</p>
          <div style="font-size:17px;line-height:1.7;">{body}</div>
          <p style="margin:32px 0 0;font-size:17px;font-style:italic;">{sign_off}</p>
        </td></tr>
        <tr><td style="padding:18px 24px;font-size:12px;color:#8a7f70;text-align:center;">
          Written on {written} and sealed until today.<br>
          <a href="{app_url}" style="color:#7a2e2e;">Write another letter to your future self</a>
        </td></tr>
      </table>
    </td></tr>
  </table>
</body>
</html>
"#
    )
}
