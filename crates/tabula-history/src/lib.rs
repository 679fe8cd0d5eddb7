pub mod command;
pub mod stack;

pub use command::{
    ClearColumnCommand, ClearFormulasCommand, ClearMasksCommand, Command, CommandBox,
    CompositeCommand, CopyCommand, InsertRowsCommand, RecordedCommand, RemoveRowsCommand,
    RenameCommand, ReplaceValuesCommand, SetDateTimeFormatCommand, SetFormulaCommand,
    SetGlobalFormulaCommand, SetMaskedCommand, SetModeCommand, SetPlotDesignationCommand,
    SetValueCommand,
};
pub use stack::{ColumnHost, HistoryManager};
