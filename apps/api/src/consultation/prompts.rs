//! Prompt Assembler — system and user turns for each consultation kind.
//!
//! Kind-independent legend first, then the kind's structural rules (rendered
//! from the result contract so prompt and validator never disagree), then the
//! client data. No I/O.

use crate::consultation::codes::{calculate, CodeError, CodeName, Codes};
use crate::consultation::library::library;
use crate::consultation::models::{
    ConsultationDetails, ConsultationKind, ConsultationRequest, Gender,
};
use crate::consultation::schema::{contract, Field, Shape};

/// Longest free-text fragment forwarded to the generator, in characters.
pub const MAX_FREE_TEXT_CHARS: usize = 2000;

pub const SYSTEM_PREAMBLE: &str = "Ты — опытный консультант по личностному развитию. \
    Ты составляешь подробные, тёплые и практически применимые консультации \
    на основе пяти кодов даты рождения. \
    Отвечай только на русском языке. \
    Ответ — строго один JSON-объект по заданной схеме, без markdown и без пояснений вне JSON.";

pub const LEGEND_HEADER: &str = "ЛЕГЕНДА КОДОВ. Каждый код — число от 1 до 9 \
    (для Миссии также мастер-числа 11 и 22). В тексте коды упоминаются в виде «Название (цифра)».";

pub const RULES_HEADER: &str = "СТРУКТУРНЫЕ ПРАВИЛА. Соблюдай количество элементов в точности:";

pub const BASE_TASK: &str = "Составь базовый профиль личности клиента. \
    Сильные и слабые стороны не должны повторять друг друга. \
    Признаки ресурса (resourceSignals) описывают проявления кодов в активном состоянии, \
    признаки дефицита (deficitSignals) — в истощённом; не смешивай эти списки и \
    не переноси их формулировки в weaknesses. \
    Для каждого из пяти кодов дай по три практики (practices) с двумя абзацами p1 и p2.";

pub const TARGET_TASK: &str = "Составь целевую консультацию по запросу клиента: \
    предупреждения, декомпозицию цели, ресурсы для этапов, диагностику текущего состояния, \
    план из трёх этапов (plan123), метрики прогресса, сценарии «что если», \
    работу с возражениями и итоговую стратегию из трёх абзацев.";

pub const PARTNER_TASK: &str = "Составь консультацию для пары по их общей цели. \
    Опиши совместимость (что дополняет и где конфликт), диагностику каждого участника \
    (firstParticipant, secondParticipant) и зоны конфликта, \
    а затем общий план из трёх этапов и итоговую стратегию из трёх абзацев.";

pub const CHILD_TASK: &str = "Составь консультацию для родителей о ребёнке: \
    потенциал, особенности развития, рекомендации по воспитанию и обучению, \
    стиль общения, трудности и их решения, занятия и хобби, \
    взаимодействие с родителями и перспективы. Пиши бережно и без ярлыков.";

pub const FINAL_TURN: &str = "Теперь сформируй итоговый документ. \
    Верни только JSON, строго по схеме, соблюдая все структурные правила.";

/// Output of the assembler: one system prompt and one or more user turns.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub system: String,
    pub user_turns: Vec<String>,
}

/// Codes for every participant a request mentions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeSet {
    pub subject: Codes,
    pub partner: Option<Codes>,
}

impl CodeSet {
    /// Computes codes for the subject and, for partner requests, the partner.
    pub fn for_request(request: &ConsultationRequest) -> Result<Self, CodeError> {
        let subject = calculate(&request.subject.birthdate)?;
        let partner = request
            .partner()
            .map(|p| calculate(&p.birthdate))
            .transpose()?;
        Ok(CodeSet { subject, partner })
    }
}

pub fn assemble(request: &ConsultationRequest, codes: &CodeSet) -> AssembledPrompt {
    let kind = request.kind();
    let system = format!(
        "{SYSTEM_PREAMBLE}\n\n{}\n\n{}",
        render_legend(),
        render_rules(kind)
    );

    let subject = render_subject(request, &codes.subject);

    let user_turns = match &request.details {
        ConsultationDetails::Base => vec![
            format!("{subject}\n\n{BASE_TASK}"),
            FINAL_TURN.to_string(),
        ],
        ConsultationDetails::Target { request: text } => vec![format!(
            "{subject}\n\nЗапрос клиента: «{}»\n\n{TARGET_TASK}",
            sanitize_free_text(text)
        )],
        ConsultationDetails::Partner { partner, goal } => {
            let partner_block = match &codes.partner {
                Some(partner_codes) => format!(
                    "Второй участник: {}\nДата рождения: {}\nКоды:\n{}",
                    sanitize_free_text(&partner.name),
                    sanitize_free_text(&partner.birthdate),
                    render_code_block(partner_codes)
                ),
                None => format!(
                    "Второй участник: {}\nКоды: не рассчитаны",
                    sanitize_free_text(&partner.name)
                ),
            };
            vec![format!(
                "Первый участник.\n{subject}\n\n{partner_block}\n\nОбщая цель пары: «{}»\n\n{PARTNER_TASK}",
                sanitize_free_text(goal)
            )]
        }
        ConsultationDetails::Child { request: text } => {
            let concern = text
                .as_deref()
                .map(sanitize_free_text)
                .filter(|t| !t.is_empty())
                .map(|t| format!("\n\nЗапрос родителей: «{t}»"))
                .unwrap_or_default();
            vec![
                format!("{subject}{concern}\n\n{CHILD_TASK}"),
                FINAL_TURN.to_string(),
            ]
        }
    };

    AssembledPrompt { system, user_turns }
}

/// Flattens caller text to a single line: control characters and line breaks
/// become spaces, whitespace runs collapse, ends are trimmed, length is capped.
pub fn sanitize_free_text(text: &str) -> String {
    let spaced: String = text
        .chars()
        .map(|c| {
            if c.is_control() || c == '\u{2028}' || c == '\u{2029}' {
                ' '
            } else {
                c
            }
        })
        .collect();
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_FREE_TEXT_CHARS) {
        Some((cut, _)) => collapsed[..cut].trim_end().to_string(),
        None => collapsed,
    }
}

/// `Name (digit)` token used wherever a code is mentioned.
pub fn code_token(name: CodeName, value: u8) -> String {
    format!("{} ({value})", name.title())
}

fn render_legend() -> String {
    let lib = library();
    let mut out = String::from(LEGEND_HEADER);
    for name in CodeName::ALL {
        out.push_str(&format!("\n- {}: {}", name.title(), lib.role(name)));
    }
    out.push_str("\nЗначения чисел:");
    for value in lib.known_values() {
        if let Some(meaning) = lib.meaning(value) {
            out.push_str(&format!(
                "\n- {value} — {}: {}",
                meaning.archetype, meaning.keywords
            ));
        }
    }
    out
}

fn render_rules(kind: ConsultationKind) -> String {
    let mut lines = Vec::new();
    collect_rules(contract(kind), "", &mut lines);
    format!("{RULES_HEADER}\n{}", lines.join("\n"))
}

/// One line per required key, nested objects included, so every key the
/// validator insists on is named in the prompt.
fn collect_rules(fields: &[Field], path: &str, lines: &mut Vec<String>) {
    for f in fields {
        let at = if path.is_empty() {
            f.key.to_string()
        } else {
            format!("{path}.{}", f.key)
        };
        match &f.shape {
            Shape::Text => lines.push(format!("- {at}: строка")),
            Shape::Texts(count) => {
                lines.push(format!("- {at}: {} строк", count.describe_ru()));
            }
            Shape::Records(count, item) => {
                lines.push(format!(
                    "- {at}: {} объектов с полями {}",
                    count.describe_ru(),
                    field_keys(item)
                ));
            }
            Shape::Object(inner) => {
                lines.push(format!("- {at}: объект с полями {}", field_keys(inner)));
                collect_rules(inner, &at, lines);
            }
        }
    }
}

fn field_keys(fields: &[Field]) -> String {
    fields.iter().map(|f| f.key).collect::<Vec<_>>().join(", ")
}

fn render_code_block(codes: &Codes) -> String {
    let lib = library();
    codes
        .iter()
        .map(|(name, value)| {
            let meaning = lib
                .meaning(value)
                .map(|m| format!("{}: {}", m.archetype, m.keywords))
                .unwrap_or_default();
            format!("- {} — {meaning}", code_token(name, value))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_subject(request: &ConsultationRequest, codes: &Codes) -> String {
    let gender = match request.subject.gender {
        Some(Gender::Male) => "мужской",
        Some(Gender::Female) => "женский",
        None => "не указан",
    };
    format!(
        "Имя: {}\nДата рождения: {}\nПол: {gender}\nКоды:\n{}",
        sanitize_free_text(&request.subject.name),
        sanitize_free_text(&request.subject.birthdate),
        render_code_block(codes)
    )
}
