/// Known section ids in their required order. Custom sections and ids
/// past `Data` are all `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Section {
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    Unknown = u8::MAX,
}

impl Section {
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Section::Type,
            2 => Section::Import,
            3 => Section::Function,
            4 => Section::Table,
            5 => Section::Memory,
            6 => Section::Global,
            7 => Section::Export,
            8 => Section::Start,
            9 => Section::Element,
            10 => Section::Code,
            11 => Section::Data,
            _ => Section::Unknown,
        }
    }

    /// Whether `self` may appear after the last known section `previous`.
    ///
    /// Each known section appears at most once and in id order. Unknown
    /// sections may sit anywhere and never count as `previous`.
    pub fn may_follow(self, previous: Option<Section>) -> bool {
        match (self, previous) {
            (Section::Unknown, _) | (_, None) => true,
            (next, Some(previous)) => previous < next,
        }
    }
}
