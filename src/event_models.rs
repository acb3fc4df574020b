use chrono::{DateTime, Utc};

/// Inventory cell identity: page + slot within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SlotKey {
    pub page_id: i64,
    pub slot_id: i64,
}

impl SlotKey {
    pub fn new(page_id: i64, slot_id: i64) -> Self {
        Self { page_id, slot_id }
    }
}

/// Loot-attribution context, set by the `ItemChange@` bracket the event
/// falls inside. Unbracketed events are `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventContext {
    PickItems,
    MapOpen,
    Recycle,
    ExchangeBuy,
    ExchangeSell,
    #[default]
    Other,
}

impl EventContext {
    /// Map a ProtoName from the log onto a context tag.
    pub fn from_proto_name(proto: &str) -> Self {
        match proto {
            "PickItems" => Self::PickItems,
            "Spv3Open" => Self::MapOpen,
            "Recycle" => Self::Recycle,
            "ExchangeBuy" => Self::ExchangeBuy,
            "ExchangeSell" => Self::ExchangeSell,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PickItems => "PickItems",
            Self::MapOpen => "MapOpen",
            Self::Recycle => "Recycle",
            Self::ExchangeBuy => "ExchangeBuy",
            Self::ExchangeSell => "ExchangeSell",
            Self::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PickItems" => Self::PickItems,
            "MapOpen" => Self::MapOpen,
            "Recycle" => Self::Recycle,
            "ExchangeBuy" => Self::ExchangeBuy,
            "ExchangeSell" => Self::ExchangeSell,
            _ => Self::Other,
        }
    }
}

/// One fragment of a multi-line exchange socket message.
///
/// The line parser recognizes fragments individually; correlation into a
/// learned price happens in [`crate::exchange::ExchangeParser`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeFragment {
    /// `----Socket SendMessage STT----XchgSearchPrice----SynId = N`
    SearchRequest { syn_id: i64 },
    /// `----Socket RecvMessage STT----XchgSearchPrice----SynId = N`
    SearchResponse { syn_id: i64 },
    /// `----Socket SendMessage End----` / `----Socket RecvMessage End----`
    End,
    /// `+refer [type_id]` inside a request body
    Refer { type_id: i64 },
    /// `+prices+K+currency [type_id]` inside a response body
    Currency { type_id: i64 },
    /// `+unitPrices+K [x.y]` or continuation `+K [x.y]`
    UnitPrice { price: f64 },
}

/// A single parsed log line.
///
/// Bag events carry the absolute stack total (`num`), never an increment.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// `BagMgr@:Modfy BagItem ...` — a live slot change.
    BagModify { slot: SlotKey, type_id: i64, num: i64 },
    /// `BagMgr@:Init BagItem ...` — inventory snapshot row (player Sort).
    /// Updates slot state but never yields a delta.
    BagInit { slot: SlotKey, type_id: i64, num: i64 },
    /// `BagMgr@:Remove BagItem ...` — slot vacated; no TypeId on the line.
    BagRemove { slot: SlotKey },
    /// `ItemChange@ ProtoName=<name> start`
    ContextBegin { proto_name: String },
    /// `ItemChange@ ProtoName=<name> end`
    ContextEnd { proto_name: String },
    /// `SceneLevelMgr@ OpenMainWorld END! InMainLevelPath = <path>`
    LevelOpen { path: String },
    /// `LevelMgr@ LevelUid, LevelType, LevelId = U T I`
    LevelEnter { level_uid: i64, level_type: i64, level_id: i64 },
    /// `RoleMgr@ <Key> = <Value>` — player identity fields.
    PlayerField { key: PlayerFieldKey, value: String },
    /// One line of a multi-line exchange message.
    Exchange(ExchangeFragment),
}

/// Player identity fields the parser recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerFieldKey {
    RoleName,
    RoleId,
    SeasonId,
}

/// A price learned from one exchange search window.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLearned {
    pub type_id: i64,
    pub reference_price: f64,
    pub listing_count: usize,
    pub learned_at: DateTime<Utc>,
}
