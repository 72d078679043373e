//! Static symbol-to-sector classification used for exposure caps.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sector {
    L1,
    Defi,
    Game,
    Infra,
    Meme,
    Other,
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sector::L1 => write!(f, "L1"),
            Sector::Defi => write!(f, "DEFI"),
            Sector::Game => write!(f, "GAME"),
            Sector::Infra => write!(f, "INFRA"),
            Sector::Meme => write!(f, "MEME"),
            Sector::Other => write!(f, "OTHER"),
        }
    }
}

/// Sector of a USDT-quoted perpetual symbol. Unknown symbols fall into OTHER.
pub fn sector_of(symbol: &str) -> Sector {
    let base = symbol.strip_suffix("USDT").unwrap_or(symbol);
    match base {
        "BTC" | "ETH" | "SOL" | "BNB" | "ADA" | "AVAX" | "DOT" | "ATOM" | "NEAR" | "APT"
        | "SUI" | "TON" | "TRX" | "LTC" | "XRP" | "SEI" | "INJ" | "TIA" => Sector::L1,
        "UNI" | "AAVE" | "MKR" | "CRV" | "COMP" | "SNX" | "SUSHI" | "LDO" | "PENDLE" | "GMX"
        | "DYDX" | "JUP" | "RUNE" | "CAKE" => Sector::Defi,
        "AXS" | "SAND" | "MANA" | "GALA" | "IMX" | "APE" | "ENJ" | "YGG" | "PIXEL" => Sector::Game,
        "LINK" | "GRT" | "FIL" | "AR" | "RNDR" | "FET" | "OCEAN" | "STX" | "ICP" | "HBAR"
        | "THETA" | "ROSE" => Sector::Infra,
        "DOGE" | "SHIB" | "PEPE" | "WIF" | "BONK" | "FLOKI" | "MEME" | "BOME" => Sector::Meme,
        _ => Sector::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sectors() {
        assert_eq!(sector_of("BTCUSDT"), Sector::L1);
        assert_eq!(sector_of("UNIUSDT"), Sector::Defi);
        assert_eq!(sector_of("AXSUSDT"), Sector::Game);
        assert_eq!(sector_of("LINKUSDT"), Sector::Infra);
        assert_eq!(sector_of("DOGEUSDT"), Sector::Meme);
    }

    #[test]
    fn test_unknown_falls_to_other() {
        assert_eq!(sector_of("ZZZUSDT"), Sector::Other);
    }
}
