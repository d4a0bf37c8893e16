use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Identifier of a board, also used as the subscription group id on the wire.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deserialize, Serialize,
)]
pub struct BoardId(pub SmolStr);

impl BoardId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for BoardId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How a board's symbol set is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoardKind {
    /// Exchange index or sector board, symbols listed by the server.
    Index,
    /// User favourites list, symbols read from the local cache.
    Favorites,
    /// Negotiated-deal board of a market; the feed decides which symbols it pushes.
    Negotiated { market_id: SmolStr },
}

/// A selectable board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Board {
    pub id: BoardId,
    #[serde(flatten)]
    pub kind: BoardKind,
}

impl Board {
    pub fn index(id: impl Into<BoardId>) -> Self {
        Self {
            id: id.into(),
            kind: BoardKind::Index,
        }
    }

    pub fn favorites(id: impl Into<BoardId>) -> Self {
        Self {
            id: id.into(),
            kind: BoardKind::Favorites,
        }
    }

    pub fn negotiated(id: impl Into<BoardId>, market_id: impl AsRef<str>) -> Self {
        Self {
            id: id.into(),
            kind: BoardKind::Negotiated {
                market_id: SmolStr::new(market_id),
            },
        }
    }

    /// Parse a board definition such as `VN30`, `fav:fav-1` or `deal:HOSE`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        match input.split_once(':') {
            None => Some(Self::index(input)),
            Some(("fav", id)) if !id.is_empty() => Some(Self::favorites(id)),
            Some(("deal", market)) if !market.is_empty() => {
                Some(Self::negotiated(format!("deal-{market}").as_str(), market))
            }
            Some(_) => None,
        }
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            BoardKind::Index => write!(f, "{}", self.id),
            BoardKind::Favorites => write!(f, "fav:{}", self.id),
            BoardKind::Negotiated { market_id } => write!(f, "deal:{market_id}"),
        }
    }
}
