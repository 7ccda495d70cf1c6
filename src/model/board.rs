use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: u64,

    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: u64,

    #[serde(default)]
    pub name: String,
}

/// Primeiro estágio com nome exatamente igual (sem normalizar caixa).
pub fn find_stage_id(name: &str, stages: &[Stage]) -> Option<u64> {
    stages.iter().find(|s| s.name == name).map(|s| s.id)
}
