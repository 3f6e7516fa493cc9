use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::DialogueConfig;
use super::slots::{Slot, SlotProvider};

/// Where the scripted conversation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    Identification,
    Qualification,
    Scheduling,
    Confirmation,
    Farewell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub reason: Option<String>,
    pub urgency: Option<Urgency>,
    pub slot: Option<Slot>,
    pub confirmed: bool,
}

/// What the receptionist says next, and the phase it leaves the call in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub message: String,
    pub phase: Phase,
}

/// One caller's conversation with the scripted receptionist
pub struct Dialogue {
    call_id: String,
    from: String,
    to: String,
    created_at: DateTime<Utc>,
    phase: Phase,
    is_new_patient: Option<bool>,
    appointment: Appointment,
    offered: Vec<Slot>,
    callback_requested: bool,
    config: Arc<DialogueConfig>,
    slots: Arc<dyn SlotProvider>,
}

impl Dialogue {
    pub fn new(
        call_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        config: Arc<DialogueConfig>,
        slots: Arc<dyn SlotProvider>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            from: from.into(),
            to: to.into(),
            created_at: Utc::now(),
            phase: Phase::Greeting,
            is_new_patient: None,
            appointment: Appointment::default(),
            offered: Vec::new(),
            callback_requested: false,
            config,
            slots,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_new_patient(&self) -> Option<bool> {
        self.is_new_patient
    }

    pub fn appointment(&self) -> &Appointment {
        &self.appointment
    }

    pub fn callback_requested(&self) -> bool {
        self.callback_requested
    }

    pub fn greeting(&self) -> &str {
        &self.config.greeting
    }

    /// Advance the conversation with one caller utterance
    pub fn respond(&mut self, input: &str) -> Reply {
        let before = self.phase;
        let message = match self.phase {
            Phase::Greeting => self.on_greeting(),
            Phase::Identification => self.on_identification(input),
            Phase::Qualification => self.on_qualification(input),
            Phase::Scheduling => self.on_scheduling(input),
            Phase::Confirmation => self.on_confirmation(input),
            Phase::Farewell => self.on_farewell(),
        };
        debug!("Call {}: {:?} -> {:?}", self.call_id, before, self.phase);

        Reply {
            message,
            phase: self.phase,
        }
    }

    fn on_greeting(&mut self) -> String {
        self.phase = Phase::Identification;
        self.config.templates.identification.clone()
    }

    fn on_identification(&mut self, input: &str) -> String {
        self.is_new_patient = Some(self.config.is_new_patient(input));
        self.phase = Phase::Qualification;
        self.config.templates.qualification.clone()
    }

    fn on_qualification(&mut self, input: &str) -> String {
        let reason = self.config.reason_for(input);
        let urgency = if self.config.is_urgent(input) {
            Urgency::High
        } else {
            Urgency::Medium
        };

        self.offered = self.slots.available_slots();
        let listing = self
            .offered
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                self.config
                    .templates
                    .slot_line
                    .replace("{index}", &(i + 1).to_string())
                    .replace("{date}", &slot.date)
                    .replace("{time}", &slot.time)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let message = self
            .config
            .templates
            .slot_offer
            .replace("{reason}", &reason)
            .replace("{slots}", &listing);

        self.appointment.reason = Some(reason);
        self.appointment.urgency = Some(urgency);
        self.phase = Phase::Scheduling;
        message
    }

    fn on_scheduling(&mut self, input: &str) -> String {
        let chosen = first_number(input)
            .filter(|n| (1..=self.offered.len()).contains(n))
            .and_then(|n| self.offered.get(n - 1).cloned());

        match chosen {
            Some(slot) => {
                let message = fill_slot(&self.config.templates.selection, &slot);
                self.appointment.slot = Some(slot);
                self.phase = Phase::Confirmation;
                message
            }
            None => self.config.templates.selection_retry.clone(),
        }
    }

    fn on_confirmation(&mut self, input: &str) -> String {
        let slot = match (&self.appointment.slot, self.config.is_affirmative(input)) {
            (Some(slot), true) => slot.clone(),
            _ => {
                self.phase = Phase::Scheduling;
                return self.config.templates.alternatives.clone();
            }
        };

        info!(
            "Call {}: appointment confirmed for {} at {}",
            self.call_id, slot.date, slot.time
        );
        self.appointment.confirmed = true;
        self.phase = Phase::Farewell;
        fill_slot(&self.config.templates.confirmed, &slot)
    }

    fn on_farewell(&mut self) -> String {
        self.callback_requested = true;
        self.config.templates.callback.clone()
    }
}

fn fill_slot(template: &str, slot: &Slot) -> String {
    template
        .replace("{date}", &slot.date)
        .replace("{time}", &slot.time)
}

/// First run of ASCII digits in `input`
fn first_number(input: &str) -> Option<usize> {
    let start = input.find(|c: char| c.is_ascii_digit())?;
    let digits: String = input[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::TomorrowSlots;
    use chrono::NaiveDate;

    struct FixedSlots(Vec<Slot>);

    impl SlotProvider for FixedSlots {
        fn available_slots(&self) -> Vec<Slot> {
            self.0.clone()
        }
    }

    fn dialogue() -> Dialogue {
        let today = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        let slots = TomorrowSlots::default().slots_after(today);
        Dialogue::new(
            "CA123",
            "+34600000000",
            "+34910000000",
            Arc::new(DialogueConfig::default()),
            Arc::new(FixedSlots(slots)),
        )
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("la opción 2 por favor"), Some(2));
        assert_eq!(first_number("prefiero la 13"), Some(13));
        assert_eq!(first_number("la segunda"), None);
    }

    #[test]
    fn test_full_booking_flow() {
        let mut d = dialogue();
        assert_eq!(d.phase(), Phase::Greeting);

        let reply = d.respond("hola");
        assert_eq!(reply.phase, Phase::Identification);
        assert!(reply.message.contains("paciente nuevo"));

        let reply = d.respond("Es mi primera vez");
        assert_eq!(reply.phase, Phase::Qualification);
        assert_eq!(d.is_new_patient(), Some(true));

        let reply = d.respond("Tengo dolor de muelas");
        assert_eq!(reply.phase, Phase::Scheduling);
        assert_eq!(
            reply.message,
            "Tengo estas opciones disponibles para urgencia dolor:\n\
             1. 10/6/2025 a las 10:30\n\
             2. 10/6/2025 a las 15:00\n\
             3. 10/6/2025 a las 17:30\n\
             ¿Cuál prefieres?"
        );
        assert_eq!(d.appointment().urgency, Some(Urgency::High));

        let reply = d.respond("la 2");
        assert_eq!(reply.phase, Phase::Confirmation);
        assert_eq!(
            reply.message,
            "Perfecto. Confirmo tu cita para 10/6/2025 a las 15:00. ¿Confirmas?"
        );

        let reply = d.respond("Sí, confirmo");
        assert_eq!(reply.phase, Phase::Farewell);
        assert!(d.appointment().confirmed);
        assert!(reply.message.starts_with("¡Perfecto! Tu cita está confirmada para 10/6/2025 a las 15:00."));
    }

    #[test]
    fn test_invalid_selection_stays_in_scheduling() {
        let mut d = dialogue();
        d.respond("hola");
        d.respond("ya soy paciente");
        d.respond("una revisión");
        assert_eq!(d.appointment().reason.as_deref(), Some("revisión"));
        assert_eq!(d.appointment().urgency, Some(Urgency::Medium));

        for input in ["la cuarta", "4", "0"] {
            let reply = d.respond(input);
            assert_eq!(reply.phase, Phase::Scheduling);
            assert!(reply.message.starts_with("No entendí tu selección"));
        }
    }

    #[test]
    fn test_declined_confirmation_returns_to_scheduling() {
        let mut d = dialogue();
        d.respond("hola");
        d.respond("nuevo");
        d.respond("limpieza");
        d.respond("1");

        let reply = d.respond("mejor no");
        assert_eq!(reply.phase, Phase::Scheduling);
        assert!(!d.appointment().confirmed);

        let reply = d.respond("3");
        assert_eq!(reply.phase, Phase::Confirmation);
        assert!(reply.message.contains("17:30"));
    }

    #[test]
    fn test_farewell_offers_callback_and_stays() {
        let mut d = dialogue();
        for input in ["hola", "nuevo", "limpieza", "1", "ok"] {
            d.respond(input);
        }
        assert_eq!(d.phase(), Phase::Farewell);

        let reply = d.respond("nada más, gracias");
        assert_eq!(reply.phase, Phase::Farewell);
        assert!(reply.message.contains("te llamará"));
        assert!(d.callback_requested());
    }
}
