use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use ava_bot::assistant::{Assistant, Services};
use ava_bot::error::{AvaBotError, Result};
use ava_bot::interfaces::services::{
    ChatModel, ChatTurn, DriveFile, DriveService, EmailSummary, ImageSource, MailService,
    PaymentLink, PaymentLinkRequest,
    PaymentService, ReplyRequest, SearchResult, SearchService, TransactionRequest,
};

#[derive(Default)]
struct FakeMail {
    fail_sends: bool,
    sent: Mutex<Vec<ReplyRequest>>,
}

fn inbox() -> Vec<EmailSummary> {
    vec![
        EmailSummary {
            id: "m-100".to_string(),
            thread_id: Some("t-100".to_string()),
            sender: "Ana <ana@example.com>".to_string(),
            subject: "Propuesta".to_string(),
            date: "Mon, 12 Oct 2026 09:00:00 -0500".to_string(),
            snippet: "Te envío la propuesta".to_string(),
            message_id: Some("<p1@mail>".to_string()),
            references: None,
        },
        EmailSummary {
            id: "m-200".to_string(),
            thread_id: Some("t-200".to_string()),
            sender: "Carlos <carlos@example.com>".to_string(),
            subject: "Reunión del lunes".to_string(),
            date: "Tue, 13 Oct 2026 10:30:00 -0500".to_string(),
            snippet: "¿Nos vemos el lunes?".to_string(),
            message_id: Some("<c2@mail>".to_string()),
            references: None,
        },
    ]
}

#[async_trait]
impl MailService for FakeMail {
    async fn list_messages(&self, _query: &str, _max_results: u32) -> Result<Vec<EmailSummary>> {
        Ok(inbox())
    }

    async fn send_reply(&self, request: &ReplyRequest) -> Result<Value> {
        self.sent.lock().unwrap().push(request.clone());
        if self.fail_sends {
            return Err(AvaBotError::Upstream {
                status: 500,
                body: "backend error".to_string(),
            });
        }
        Ok(json!({"id": "sent-1", "threadId": request.thread_id}))
    }
}

#[derive(Default)]
struct FakePayments {
    links: Mutex<Vec<PaymentLinkRequest>>,
}

#[async_trait]
impl PaymentService for FakePayments {
    async fn create_transaction(&self, _request: &TransactionRequest) -> Result<Value> {
        Err(AvaBotError::Runtime("not used".to_string()))
    }

    async fn get_transaction(&self, _transaction_id: &str) -> Result<Value> {
        Err(AvaBotError::Runtime("not used".to_string()))
    }

    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink> {
        self.links.lock().unwrap().push(request.clone());
        Ok(PaymentLink {
            id: "link_1".to_string(),
            url: "https://checkout.wompi.co/l/link_1".to_string(),
            reference: "ref_test".to_string(),
        })
    }

    fn verify_webhook(&self, _body: &[u8], _signature: &str) -> bool {
        false
    }
}

#[derive(Default)]
struct EchoChat {
    histories: Mutex<Vec<usize>>,
}

#[async_trait]
impl ChatModel for EchoChat {
    async fn complete(&self, system: &str, history: &[ChatTurn], user: &str) -> Result<String> {
        assert!(system.contains("Ava"));
        self.histories.lock().unwrap().push(history.len());
        Ok(format!("eco: {user}"))
    }

    async fn describe_image(&self, prompt: &str, image: &ImageSource) -> Result<String> {
        match image {
            ImageSource::Url(url) => Ok(format!("{prompt} -> {url}")),
            ImageSource::Png(bytes) => Ok(format!("{prompt} -> {} bytes", bytes.len())),
        }
    }
}

#[derive(Default)]
struct FakeSearch {
    queries: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchService for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &str, _max_results: u32) -> Result<Vec<SearchResult>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(vec![SearchResult {
            title: "Tokio".to_string(),
            link: "https://tokio.rs".to_string(),
            snippet: "Runtime asíncrono para Rust".to_string(),
            display_link: "tokio.rs".to_string(),
        }])
    }
}

#[derive(Default)]
struct FakeDrive {
    uploaded: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl DriveService for FakeDrive {
    async fn upload_file(&self, path: &Path, _folder_id: Option<&str>) -> Result<DriveFile> {
        self.uploaded.lock().unwrap().push(path.to_path_buf());
        Ok(DriveFile {
            id: "f1".to_string(),
            name: None,
            mime_type: None,
            web_view_link: Some("https://drive.google.com/file/d/f1/view".to_string()),
        })
    }

    async fn list_files(&self, _query: Option<&str>) -> Result<Vec<DriveFile>> {
        Ok(Vec::new())
    }
}

fn assistant(services: Services) -> Assistant {
    Assistant::new(services, "Eres Ava.", "America/Bogota")
}

#[tokio::test]
async fn reply_flow_sends_the_selected_email_after_confirmation() {
    let mail = Arc::new(FakeMail::default());
    let ava = assistant(Services {
        mail: Some(mail.clone()),
        ..Services::default()
    });

    let listing = ava.handle("u1", "muéstrame mis correos").await;
    assert!(listing.response.starts_with("Encontré 2 correos:"));
    assert!(listing.active_task.is_none());

    let ask = ava.handle("u1", "quiero responder un correo").await;
    let task = ask.active_task.expect("reply task started");
    assert_eq!(task.name, "email_responding");
    assert_eq!(task.step, "select_email");

    let picked = ava.handle("u1", "2").await;
    assert!(picked.response.contains("Carlos <carlos@example.com>"));
    assert_eq!(picked.active_task.unwrap().step, "draft_response");

    let body = "Perfecto, nos vemos el lunes a las 10.";
    let confirm = ava.handle("u1", body).await;
    assert!(confirm.response.contains(body));
    assert_eq!(confirm.active_task.unwrap().step, "confirm_send");

    let sent = ava.handle("u1", "si").await;
    assert_eq!(sent.response, "¡Respuesta enviada exitosamente!");
    assert!(sent.active_task.is_none());

    let requests = mail.sent.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].email_id, "m-200");
    assert_eq!(requests[0].to, "Carlos <carlos@example.com>");
    assert_eq!(requests[0].subject, "Re: Reunión del lunes");
    assert_eq!(requests[0].in_reply_to.as_deref(), Some("<c2@mail>"));
    assert_eq!(requests[0].body, body);
}

#[tokio::test]
async fn reply_flow_ignores_unknown_selections_and_can_redraft() {
    let mail = Arc::new(FakeMail::default());
    let ava = assistant(Services {
        mail: Some(mail.clone()),
        ..Services::default()
    });
    ava.handle("u1", "muéstrame mis correos").await;
    ava.handle("u1", "quiero responder un correo").await;

    for input in ["el segundo", "7"] {
        let retry = ava.handle("u1", input).await;
        assert!(retry.response.starts_with("No entendí qué correo"));
        assert_eq!(retry.active_task.unwrap().step, "select_email");
    }

    ava.handle("u1", "1").await;
    ava.handle("u1", "Lo reviso y te aviso.").await;
    let redraft = ava.handle("u1", "no").await;
    assert_eq!(redraft.active_task.unwrap().step, "draft_response");

    ava.handle("u1", "Acepto la propuesta.").await;
    ava.handle("u1", "sí").await;
    let requests = mail.sent.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].email_id, "m-100");
    assert_eq!(requests[0].body, "Acepto la propuesta.");
}

#[tokio::test]
async fn failed_send_ends_the_reply_task() {
    let mail = Arc::new(FakeMail {
        fail_sends: true,
        ..FakeMail::default()
    });
    let ava = assistant(Services {
        mail: Some(mail.clone()),
        ..Services::default()
    });
    ava.handle("u1", "muéstrame mis correos").await;
    ava.handle("u1", "responder al correo 2").await;
    ava.handle("u1", "Nos vemos el lunes.").await;

    let failed = ava.handle("u1", "si").await;
    assert_eq!(
        failed.response,
        "Lo siento, hubo un problema al enviar la respuesta."
    );
    assert!(failed.active_task.is_none());
    assert!(ava.active_task("u1").await.is_none());
    assert_eq!(mail.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reply_without_listing_shows_the_inbox_first() {
    let mail = Arc::new(FakeMail::default());
    let ava = assistant(Services {
        mail: Some(mail.clone()),
        ..Services::default()
    });

    let reply = ava.handle("u1", "responde un correo").await;
    assert!(reply.response.starts_with("Primero necesito que veas tus correos."));
    assert!(reply.response.contains("Encontré 2 correos:"));
    assert!(reply.active_task.is_none());

    let reply = ava.handle("u1", "responder al correo 1").await;
    let task = reply.active_task.unwrap();
    assert_eq!(task.step, "draft_response");
    assert!(reply.response.contains("Ana <ana@example.com>"));
    assert!(mail.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sessions_are_isolated_and_reset_drops_the_task() {
    let ava = assistant(Services {
        mail: Some(Arc::new(FakeMail::default())),
        ..Services::default()
    });

    ava.handle("u1", "lee mis correos").await;
    ava.handle("u1", "responde un correo").await;
    assert!(ava.active_task("u1").await.is_some());
    assert!(ava.active_task("u2").await.is_none());

    assert!(ava.reset("u1").await);
    assert!(ava.active_task("u1").await.is_none());
    assert!(!ava.reset("u1").await);
}

#[tokio::test]
async fn payment_link_flow_collects_and_creates_the_link() {
    let payments = Arc::new(FakePayments::default());
    let ava = assistant(Services {
        payments: Some(payments.clone()),
        ..Services::default()
    });

    let started = ava.handle("u1", "crea un link de pago").await;
    assert_eq!(started.active_task.unwrap().name, "payment_link");

    ava.handle("u1", "150.000").await;
    let confirm = ava.handle("u1", "Asesoría de marketing").await;
    assert_eq!(confirm.active_task.unwrap().step, "confirm_link");

    let done = ava.handle("u1", "sí").await;
    assert!(done.response.contains("https://checkout.wompi.co/l/link_1"));
    assert!(done.active_task.is_none());

    let links = payments.links.lock().unwrap().clone();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].amount_in_cents, 15_000_000);
    assert_eq!(links[0].currency, "COP");
    assert_eq!(links[0].description, "Asesoría de marketing");
}

#[tokio::test]
async fn payment_link_can_be_cancelled() {
    let payments = Arc::new(FakePayments::default());
    let ava = assistant(Services {
        payments: Some(payments.clone()),
        ..Services::default()
    });

    ava.handle("u1", "crea un link de pago").await;
    ava.handle("u1", "50000").await;
    ava.handle("u1", "Clase de yoga").await;
    let cancelled = ava.handle("u1", "no").await;
    assert_eq!(cancelled.response, "Listo, cancelé la creación del link de pago.");
    assert!(cancelled.active_task.is_none());
    assert!(payments.links.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unmatched_text_goes_to_the_chat_model_with_history() {
    let chat = Arc::new(EchoChat::default());
    let ava = assistant(Services {
        chat: Some(chat.clone()),
        ..Services::default()
    });

    assert_eq!(ava.handle("u1", "hola").await.response, "eco: hola");
    assert_eq!(
        ava.handle("u1", "cuéntame un chiste").await.response,
        "eco: cuéntame un chiste"
    );
    assert_eq!(*chat.histories.lock().unwrap(), vec![0, 2]);

    let described = ava
        .handle_with_image("u1", "", ImageSource::Url("https://img.example/gato.png".to_string()))
        .await;
    assert_eq!(
        described.response,
        "¿Qué hay en esta imagen? -> https://img.example/gato.png"
    );
}

#[tokio::test]
async fn web_search_results_are_summarized_by_the_chat_model() {
    let search = Arc::new(FakeSearch::default());
    let ava = assistant(Services {
        search: Some(search.clone()),
        ..Services::default()
    });
    let plain = ava.handle("u1", "busca en internet runtimes de rust").await;
    assert!(plain.response.contains("Encontré 1 resultados relevantes"));
    assert!(plain.response.contains("https://tokio.rs"));

    let ava = assistant(Services {
        search: Some(search.clone()),
        chat: Some(Arc::new(EchoChat::default())),
        ..Services::default()
    });
    let analyzed = ava.handle("u1", "investiga sobre tokio").await;
    assert!(analyzed.response.starts_with("eco: "));
    assert!(analyzed.response.contains("Runtime asíncrono para Rust"));

    assert_eq!(
        *search.queries.lock().unwrap(),
        vec!["runtimes de rust".to_string(), "tokio".to_string()]
    );
}

#[tokio::test]
async fn drive_uploads_stay_inside_the_upload_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("generated_images");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("informe.pdf"), b"%PDF").unwrap();
    std::fs::write(dir.path().join("users.db"), b"secret").unwrap();

    let drive = Arc::new(FakeDrive::default());
    let ava = assistant(Services {
        drive: Some(drive.clone()),
        ..Services::default()
    })
    .with_upload_root(&root);

    let uploaded = ava.handle("u1", "sube informe.pdf a drive").await;
    assert_eq!(
        uploaded.response,
        "Archivo subido a Drive: https://drive.google.com/file/d/f1/view"
    );

    let escaped = ava.handle("u1", "sube ../users.db a drive").await;
    assert!(escaped.response.starts_with("Solo puedo subir a Drive"));

    let outside = dir.path().join("users.db");
    let absolute = ava
        .handle("u1", &format!("sube \"{}\" a drive", outside.display()))
        .await;
    assert!(absolute.response.starts_with("Solo puedo subir a Drive"));

    let missing = ava.handle("u1", "sube otro.pdf a drive").await;
    assert!(missing.response.starts_with("No encontré el archivo"));

    let uploads = drive.uploaded.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].ends_with("informe.pdf"));
}

#[tokio::test]
async fn missing_services_answer_with_setup_hints() {
    let ava = assistant(Services::default());

    let reply = ava.handle("u1", "crea un link de pago por 20000").await;
    assert!(reply.response.contains("WOMPI_PRIVATE_KEY"));
    assert!(reply.active_task.is_none());

    let reply = ava.handle("u1", "genera una imagen de un faro").await;
    assert!(reply.response.contains("TOGETHER_API_KEY"));

    let reply = ava.handle("u1", "busca en internet recetas de arepas").await;
    assert!(reply.response.contains("TAVILY_API_KEY"));

    let reply = ava.handle("u1", "hola").await;
    assert!(reply.response.contains("GROQ_API_KEY"));
}
