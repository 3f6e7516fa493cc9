use serde::{Deserialize, Serialize};

/// Maps a keyword heard in the caller's words to an appointment reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonKeyword {
    pub keyword: String,
    pub reason: String,
}

impl ReasonKeyword {
    fn new(keyword: &str, reason: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Reply texts. Placeholders in braces are substituted per template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyTemplates {
    pub identification: String,
    pub qualification: String,
    pub slot_offer: String,
    pub slot_line: String,
    pub selection: String,
    pub selection_retry: String,
    pub confirmed: String,
    pub alternatives: String,
    pub callback: String,
}

impl Default for ReplyTemplates {
    fn default() -> Self {
        Self {
            identification: "Para ayudarte mejor, necesito saber: ¿Es usted paciente nuevo o ya nos ha visitado antes?".into(),
            qualification: "¡Bienvenido! ¿Cuál es el motivo de tu consulta? (limpieza, dolor, revisión, tratamiento específico)".into(),
            slot_offer: "Tengo estas opciones disponibles para {reason}:\n{slots}\n¿Cuál prefieres?".into(),
            slot_line: "{index}. {date} a las {time}".into(),
            selection: "Perfecto. Confirmo tu cita para {date} a las {time}. ¿Confirmas?".into(),
            selection_retry: "No entendí tu selección. ¿Podrías decirme el número de la opción que prefieres?".into(),
            confirmed: "¡Perfecto! Tu cita está confirmada para {date} a las {time}. Te enviaremos un recordatorio. ¿Hay algo más en lo que pueda ayudarte?".into(),
            alternatives: "Entendido. ¿Quieres ver otras opciones o prefieres que te llame un humano?".into(),
            callback: "Entendido. Un miembro de nuestro equipo te llamará en los próximos minutos. ¿Hay algo específico que debamos saber?".into(),
        }
    }
}

/// Clinic-specific vocabulary and wording of the scripted receptionist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// First thing a caller hears
    pub greeting: String,
    pub new_patient_keywords: Vec<String>,
    pub urgency_keywords: Vec<String>,
    /// Checked in order; the first keyword found wins
    pub reasons: Vec<ReasonKeyword>,
    pub default_reason: String,
    pub affirmative_keywords: Vec<String>,
    pub templates: ReplyTemplates,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            greeting: "Hola, has llamado a Clínica Dental Madrid. Soy la recepcionista virtual. ¿En qué puedo ayudarte?".into(),
            new_patient_keywords: vec!["nuevo".into(), "primera vez".into(), "nunca".into()],
            urgency_keywords: vec!["dolor".into(), "urgente".into(), "hoy".into()],
            reasons: vec![
                ReasonKeyword::new("limpieza", "limpieza"),
                ReasonKeyword::new("dolor", "urgencia dolor"),
                ReasonKeyword::new("revisión", "revisión"),
                ReasonKeyword::new("ortodoncia", "ortodoncia"),
                ReasonKeyword::new("blanqueamiento", "blanqueamiento"),
            ],
            default_reason: "consulta general".into(),
            affirmative_keywords: vec!["sí".into(), "confirmo".into(), "ok".into()],
            templates: ReplyTemplates::default(),
        }
    }
}

impl DialogueConfig {
    pub(crate) fn is_new_patient(&self, input: &str) -> bool {
        contains_any(input, &self.new_patient_keywords)
    }

    pub(crate) fn is_urgent(&self, input: &str) -> bool {
        contains_any(input, &self.urgency_keywords)
    }

    pub(crate) fn is_affirmative(&self, input: &str) -> bool {
        contains_any(input, &self.affirmative_keywords)
    }

    pub(crate) fn reason_for(&self, input: &str) -> String {
        let input = input.to_lowercase();
        self.reasons
            .iter()
            .find(|entry| input.contains(&entry.keyword.to_lowercase()))
            .map(|entry| entry.reason.clone())
            .unwrap_or_else(|| self.default_reason.clone())
    }
}

fn contains_any(input: &str, keywords: &[String]) -> bool {
    let input = input.to_lowercase();
    keywords.iter().any(|k| input.contains(&k.to_lowercase()))
}
