//! Read-only reference text used by the prompt assembler.
//!
//! Built once on first use and shared process-wide; nothing mutates it afterwards.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::consultation::codes::CodeName;

/// Interpretation keywords for one code value.
#[derive(Debug, Clone)]
pub struct CodeMeaning {
    pub archetype: &'static str,
    pub keywords: &'static str,
}

#[derive(Debug)]
pub struct PromptLibrary {
    meanings: BTreeMap<u8, CodeMeaning>,
    roles: BTreeMap<CodeName, &'static str>,
}

impl PromptLibrary {
    /// Interpretation for a code value, if the value is a known code.
    pub fn meaning(&self, value: u8) -> Option<&CodeMeaning> {
        self.meanings.get(&value)
    }

    /// What a code position describes, independent of its value.
    pub fn role(&self, name: CodeName) -> &'static str {
        self.roles.get(&name).copied().unwrap_or_default()
    }

    pub fn known_values(&self) -> impl Iterator<Item = u8> + '_ {
        self.meanings.keys().copied()
    }
}

static LIBRARY: OnceLock<PromptLibrary> = OnceLock::new();

pub fn library() -> &'static PromptLibrary {
    LIBRARY.get_or_init(build_library)
}

fn build_library() -> PromptLibrary {
    let meanings = [
        (1, "Лидер", "инициатива, самостоятельность, воля, первенство"),
        (2, "Дипломат", "партнёрство, чуткость, согласие, поддержка"),
        (3, "Творец", "самовыражение, общение, лёгкость, вдохновение"),
        (4, "Строитель", "структура, надёжность, порядок, терпение"),
        (5, "Искатель", "свобода, перемены, любознательность, движение"),
        (6, "Хранитель", "забота, ответственность, семья, гармония"),
        (7, "Аналитик", "глубина, исследование, уединение, мудрость"),
        (8, "Управленец", "ресурсы, влияние, результат, масштаб"),
        (9, "Гуманист", "служение, сострадание, завершение, широта взглядов"),
        (11, "Проводник", "интуиция, вдохновение других, тонкое восприятие"),
        (22, "Архитектор", "воплощение больших замыслов, системность, созидание"),
    ]
    .into_iter()
    .map(|(value, archetype, keywords)| (value, CodeMeaning { archetype, keywords }))
    .collect();

    let roles = BTreeMap::from([
        (
            CodeName::Personality,
            "базовый характер, то, как человек проявляется в мире",
        ),
        (
            CodeName::Connector,
            "способ взаимодействия с людьми и установления связей",
        ),
        (
            CodeName::Realization,
            "сфера, в которой человек раскрывает себя через дело",
        ),
        (
            CodeName::Generator,
            "источник внутренней энергии и восстановления ресурса",
        ),
        (
            CodeName::Mission,
            "главная жизненная задача, к которой ведут остальные коды",
        ),
    ]);

    PromptLibrary { meanings, roles }
}
