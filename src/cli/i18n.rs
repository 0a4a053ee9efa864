use crate::types::Lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    Title,
    Job,
    Connection,
    Idle,
    NotTested,
    RunningFor,
    Test,
    Upload,
    Download,
    List,
    Status,
    Stop,
    Log,
    Clear,
    Setup,
    Quit,
    Choice,
    Invalid,
    PressEnter,
    AutoTest,
    NoArchives,
    ArchivePrompt,
    TargetPrompt,
    ConfigProblem,
    Bye,
}

pub fn tr(lang: Lang, text: Text) -> &'static str {
    match lang {
        Lang::En => en(text),
        Lang::De => de(text),
    }
}

fn en(text: Text) -> &'static str {
    match text {
        Text::Title => "borgrelay: disk image backups",
        Text::Job => "Job",
        Text::Connection => "Connection",
        Text::Idle => "idle",
        Text::NotTested => "not tested",
        Text::RunningFor => "running for",
        Text::Test => "Test connection",
        Text::Upload => "Upload latest backup",
        Text::Download => "Download an archive",
        Text::List => "List archives",
        Text::Status => "Show status",
        Text::Stop => "Stop running job",
        Text::Log => "Show log",
        Text::Clear => "Clear status",
        Text::Setup => "Setup",
        Text::Quit => "Quit",
        Text::Choice => "Choice: ",
        Text::Invalid => "invalid choice",
        Text::PressEnter => "press Enter to continue",
        Text::AutoTest => "checking connection ...",
        Text::NoArchives => "no archives in the repository",
        Text::ArchivePrompt => "archive (number or name, empty to cancel): ",
        Text::TargetPrompt => "extract into directory",
        Text::ConfigProblem => "configuration problem; choose Setup to fix it",
        Text::Bye => "bye",
    }
}

fn de(text: Text) -> &'static str {
    match text {
        Text::Title => "borgrelay: Sicherung von Festplattenabbildern",
        Text::Job => "Auftrag",
        Text::Connection => "Verbindung",
        Text::Idle => "keiner",
        Text::NotTested => "nicht geprüft",
        Text::RunningFor => "läuft seit",
        Text::Test => "Verbindung prüfen",
        Text::Upload => "Neueste Sicherung hochladen",
        Text::Download => "Archiv herunterladen",
        Text::List => "Archive anzeigen",
        Text::Status => "Status anzeigen",
        Text::Stop => "Laufenden Auftrag abbrechen",
        Text::Log => "Protokoll anzeigen",
        Text::Clear => "Status zurücksetzen",
        Text::Setup => "Einrichtung",
        Text::Quit => "Beenden",
        Text::Choice => "Auswahl: ",
        Text::Invalid => "ungültige Auswahl",
        Text::PressEnter => "weiter mit Enter",
        Text::AutoTest => "prüfe Verbindung ...",
        Text::NoArchives => "keine Archive im Repository",
        Text::ArchivePrompt => "Archiv (Nummer oder Name, leer zum Abbrechen): ",
        Text::TargetPrompt => "Zielverzeichnis",
        Text::ConfigProblem => "Konfigurationsfehler; mit Einrichtung beheben",
        Text::Bye => "Auf Wiedersehen",
    }
}
