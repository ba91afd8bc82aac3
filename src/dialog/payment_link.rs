use std::sync::Arc;

use async_trait::async_trait;

use super::engine::{Dialog, Flow, Intent, Signal, Transition};
use super::{fsm, intent, ConversationState, TaskData};
use crate::adapters::AdapterResult;
use crate::error::AvaBotError;
use crate::interfaces::services::{PaymentLinkRequest, PaymentService};

pub const DEFAULT_EXPIRY_MINUTES: u32 = 1440;
const LINK_NAME_LIMIT: usize = 64;
const ASK_AMOUNT: &str =
    "¿Por qué valor quieres el link de pago? Indícalo en pesos colombianos, por ejemplo 150000.";
const ASK_DESCRIPTION: &str = "¿Cuál es el concepto o la descripción del cobro?";
const RETRY_DESCRIPTION: &str =
    "La descripción no puede estar vacía. ¿Cuál es el concepto del cobro?";
const RETRY_CONFIRM: &str = "Por favor responde 'sí' para confirmar o 'no' para cancelar.";
const CANCELLED: &str = "Listo, cancelé la creación del link de pago.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStep {
    CollectAmount,
    CollectDescription,
    ConfirmLink,
}

impl PaymentStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStep::CollectAmount => "collect_amount",
            PaymentStep::CollectDescription => "collect_description",
            PaymentStep::ConfirmLink => "confirm_link",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentLinkDraft {
    pub amount_in_cents: Option<u64>,
    pub description: Option<String>,
}

impl PaymentLinkDraft {
    /// "link de pago de $80.000 para asesoría" carries both fields.
    pub fn from_request(text: &str) -> Self {
        let Some((cents, rest)) = intent::find_amount(text) else {
            return Self::default();
        };
        let rest = rest.trim();
        let description = ["por concepto de ", "para ", "por "]
            .iter()
            .find_map(|marker| {
                let lowered = rest.to_lowercase();
                lowered
                    .starts_with(marker)
                    .then(|| rest[marker.len()..].trim().to_string())
            })
            .filter(|description| !description.is_empty());
        Self {
            amount_in_cents: Some(cents),
            description,
        }
    }

    fn first_missing_step(&self) -> PaymentStep {
        match (self.amount_in_cents, &self.description) {
            (None, _) => PaymentStep::CollectAmount,
            (Some(_), None) => PaymentStep::CollectDescription,
            (Some(_), Some(_)) => PaymentStep::ConfirmLink,
        }
    }
}

pub struct PaymentLinkFlow {
    payments: Arc<dyn PaymentService>,
}

impl PaymentLinkFlow {
    pub fn new(payments: Arc<dyn PaymentService>) -> Self {
        Self { payments }
    }

    pub fn begin(&self, state: &mut ConversationState) {
        let data = PaymentLinkDraft::from_request(&state.input);
        let step = data.first_missing_step();
        state.response = self.prompt(step, &data);
        state.set_task(TaskData::PaymentLink(Dialog { step, data }));
    }
}

#[async_trait]
impl Flow for PaymentLinkFlow {
    type Step = PaymentStep;
    type Data = PaymentLinkDraft;

    fn name(&self) -> &'static str {
        "payment_link"
    }

    fn read(&self, step: PaymentStep, input: &str, _data: &PaymentLinkDraft) -> Intent {
        match step {
            PaymentStep::CollectAmount => intent::amount(input),
            PaymentStep::CollectDescription => intent::free_text(input),
            PaymentStep::ConfirmLink => intent::confirmation(input),
        }
    }

    fn next(&self, step: PaymentStep, signal: Signal) -> Option<Transition<PaymentStep>> {
        fsm::payment_transition(step, signal)
    }

    fn apply(&self, step: PaymentStep, intent: &Intent, data: &mut PaymentLinkDraft) {
        match (step, intent) {
            (PaymentStep::CollectAmount, Intent::Amount(cents)) => {
                data.amount_in_cents = Some(*cents);
            }
            (PaymentStep::CollectDescription, Intent::Content(text)) => {
                data.description = Some(text.clone());
            }
            _ => {}
        }
    }

    fn prompt(&self, step: PaymentStep, data: &PaymentLinkDraft) -> String {
        match step {
            PaymentStep::CollectAmount => ASK_AMOUNT.to_string(),
            PaymentStep::CollectDescription => ASK_DESCRIPTION.to_string(),
            PaymentStep::ConfirmLink => format!(
                "Voy a crear un link de pago de un solo uso por {} COP para \"{}\", válido por 24 horas. ¿Confirmas? Responde 'sí' o 'no'.",
                intent::format_cop(data.amount_in_cents.unwrap_or_default()),
                data.description.as_deref().unwrap_or_default()
            ),
        }
    }

    fn retry_prompt(&self, step: PaymentStep, input: &str, _data: &PaymentLinkDraft) -> String {
        match step {
            PaymentStep::CollectAmount => format!(
                "No entendí el valor '{}'. Indica un monto mayor a cero, por ejemplo 150000.",
                input.trim()
            ),
            PaymentStep::CollectDescription => RETRY_DESCRIPTION.to_string(),
            PaymentStep::ConfirmLink => RETRY_CONFIRM.to_string(),
        }
    }

    async fn commit(&self, data: &PaymentLinkDraft) -> AdapterResult {
        let (Some(amount_in_cents), Some(description)) =
            (data.amount_in_cents, data.description.as_ref())
        else {
            return AdapterResult::from_outcome::<()>(
                "wompi.create_payment_link",
                Err(AvaBotError::Validation(
                    "payment link needs an amount and a description".to_string(),
                )),
            );
        };
        let request = PaymentLinkRequest {
            name: description.chars().take(LINK_NAME_LIMIT).collect(),
            description: description.clone(),
            amount_in_cents,
            currency: "COP".to_string(),
            expires_in_minutes: DEFAULT_EXPIRY_MINUTES,
        };
        AdapterResult::from_outcome(
            "wompi.create_payment_link",
            self.payments.create_payment_link(&request).await,
        )
    }

    fn completed_message(&self, _data: &PaymentLinkDraft, result: &AdapterResult) -> String {
        format!(
            "¡Link de pago creado! Compártelo con tu cliente: {}\nReferencia: {}",
            result.field("url").unwrap_or("(sin enlace)"),
            result.field("reference").unwrap_or("-")
        )
    }

    fn failure_message(&self, _data: &PaymentLinkDraft, result: &AdapterResult) -> String {
        format!(
            "Lo siento, no pude crear el link de pago: {}",
            result.error_text()
        )
    }

    fn cancelled_message(&self, _data: &PaymentLinkDraft) -> String {
        CANCELLED.to_string()
    }
}
