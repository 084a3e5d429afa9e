//! Queued SMTP Sending Example
//!
//! This example demonstrates how to:
//! - Configure a STARTTLS session with PLAIN authentication
//! - Queue several messages on one connection and await their handles
//! - Attach a file and an HTML alternative
//! - Watch session-level error notifications
//!
//! Run with: `cargo run --example queued_send -- smtp.example.com user password`

use futures::future::join_all;
use integrations_smtp_session::{
    AuthMethod, EmailAddress, Message, MimePart, MultipartKind, SmtpClient, SmtpConfig, SmtpError,
};

#[tokio::main]
async fn main() -> Result<(), SmtpError> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "smtp.example.com".to_string());
    let username = args.next().unwrap_or_else(|| "user@example.com".to_string());
    let password = args.next().unwrap_or_else(|| "your-password".to_string());

    let config = SmtpConfig::builder()
        .host(host)
        .port(587)
        .client_name("demo.example.com")
        .credentials(username.clone(), password)
        .auth_method(AuthMethod::Plain)
        .build()?;

    println!("Starting SMTP session with {}...", config.address());
    let client = SmtpClient::new(config)?;

    let mut notifications = client.notifications();
    tokio::spawn(async move {
        while let Ok(error) = notifications.recv().await {
            eprintln!("  session notice: {}", error);
        }
    });

    let sender = EmailAddress::with_name(username, "Demo Sender")?;
    let mut handles = Vec::new();

    for i in 1..=3 {
        let body = MimePart::multipart(MultipartKind::Alternative)
            .part(MimePart::text(format!("Plain text body of message {}.", i)))
            .part(MimePart::html(format!("<p>HTML body of message <b>{}</b>.</p>", i)));

        let message = Message::builder()
            .from(sender.clone())
            .to(EmailAddress::new(format!("recipient{}@example.com", i))?)
            .bcc(EmailAddress::new("archive@example.com")?)
            .subject(format!("Queued message #{}", i))
            .part(body)
            .part(MimePart::attachment_bytes(
                "notes.txt",
                format!("Attachment for message {}\r\n", i).into_bytes(),
            ))
            .build()?;

        println!("Queueing message {}", i);
        handles.push(client.submit(message)?);
    }

    let outcomes = join_all(handles.iter().map(|handle| handle.finished())).await;
    for (i, outcome) in outcomes.iter().enumerate() {
        if outcome.is_error {
            println!("Message {} failed: {} {}", i + 1, outcome.response_code, outcome.response_text);
        } else {
            println!("Message {} accepted: {}", i + 1, outcome.response_text);
        }
    }

    let metrics = client.metrics();
    println!("Sent: {}, failed: {}", metrics.messages_sent, metrics.messages_failed);

    client.shutdown().await?;
    Ok(())
}
