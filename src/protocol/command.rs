#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    BoardsList,
    StagesList,
    StagesFind,
    TasksList,
    TasksMove,
    TasksUpdateDesiredDate,
    Unknown,
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "ping" => Command::Ping,
            "boards.list" => Command::BoardsList,
            "stages.list" => Command::StagesList,
            "stages.find" => Command::StagesFind,
            "tasks.list" => Command::TasksList,
            "tasks.move" => Command::TasksMove,
            "tasks.update_desired_date" | "update_desired_date" => Command::TasksUpdateDesiredDate,
            _ => Command::Unknown,
        }
    }
}
