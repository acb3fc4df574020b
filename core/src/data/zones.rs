//! Zone classification tables.
//!
//! Zone identity comes from the level path in `OpenMainWorld` lines.
//! Display names, hub detection, and sub-zone recognition are data lookups
//! so new zones are a table edit, not a code change. Zones that share a
//! path across regions are disambiguated by the LevelId suffix
//! (`level_id % 100`), and a short exact-LevelId table covers the zones
//! that do not follow the suffix pattern.

/// Path fragments identifying hub/town zones. Hub runs never accrue loot.
pub const HUB_PATH_FRAGMENTS: &[&str] = &[
    "hideout",
    "town",
    "hub",
    "lobby",
    "social",
    // Hideouts share zone codes with maps, so they are matched by name.
    "YuJinZhiXiBiNanSuo",
    "ShengTingZhuangYuan",
    "ZhuCheng",
    "/UI/",
    "LoginScene",
];

/// Path fragments identifying recognized sub-zones: excursions entered from
/// inside a map that must splice back into the outer run.
pub const SUB_ZONE_PATH_FRAGMENTS: &[&str] = &[
    "SuMingTaLuo", // Fateful Contest (arcana mechanic)
    "WuDuYiZhi",   // Mistville (legacy league mechanic)
];

/// Level types marking sub-zone excursions when the path alone is ambiguous.
pub const SUB_ZONE_LEVEL_TYPES: &[i64] = &[
    11, // nightmare
    19, // arcana contest
];

/// Exact LevelIds for sub-zones that follow neither pattern (trial variants).
pub const SUB_ZONE_LEVEL_IDS: &[i64] = &[212023, 999901, 999902, 999903, 999904, 999905];

/// Path fragment → English display name.
const ZONE_NAMES: &[(&str, &str)] = &[
    // Hideouts / hubs
    ("XZ_YuJinZhiXiBiNanSuo", "Hideout - Ember's Rest"),
    ("DD_ShengTingZhuangYuan", "Hideout - Sacred Court Manor"),
    // Sandlord
    ("YunDuanLvZhou", "Cloud Oasis"),
    // Voidlands entries with number suffixes come before generic fragments.
    ("DD_ShengTingZhuangYuan000", "Voidlands - Mundane Palace"),
    // Blistering Lava Sea
    ("KD_YuanSuKuangDong", "Blistering Lava Sea - Elemental Mine"),
    ("DD_ChaoBaiZhiLu", "Blistering Lava Sea - Path of Sacrifice"),
    ("SD_ShouGuSiDi", "Blistering Lava Sea - Dragonrest Cavern"),
    ("JH_ZuiRenMiDian", "Blistering Lava Sea - Where Lies Confession"),
    ("YJ_LuoRiQiongDi", "Blistering Lava Sea - Sunset Dome Bottom"),
    ("SQ_BianChuiZhiDi", "Blistering Lava Sea - Savage Grasslands"),
    ("JH_MengZhongShengDi", "Blistering Lava Sea - Shimmering Hall"),
    ("KD_AiRenDiSanCeng", "Blistering Lava Sea - Heart of the Mountains"),
    ("JH_ShengDeLanXiuDaoYuan", "Blistering Lava Sea - Confession Chapel"),
    ("SD_ShouGuLinDi", "Blistering Lava Sea - Twisted Valley"),
    ("DD_DiDuTingYuan200", "Blistering Lava Sea - Court of Darkness"),
    ("KD_RongHuoHeXin", "Blistering Lava Sea - Smelting Plant"),
    ("YanYuZhiGu", "Blistering Lava Sea - Hellfire Chasm"),
    // Glacial Abyss
    ("DD_TingYuanMiGong", "Glacial Abyss - High Court Maze"),
    ("YJ_XieDuYuZuo", "Glacial Abyss - Defiled Side Chamber"),
    ("DD_ZaWuJieQu", "Glacial Abyss - Deserted District"),
    ("SQ_MingShaJuLuo", "Glacial Abyss - Singing Sand"),
    ("SD_GeBuLinShanZhai", "Glacial Abyss - Shadow Outpost"),
    ("GeBuLinCunLuo", "Demiman Village"),
    ("KD_AiRenKuangDong", "Glacial Abyss - Abandoned Mines"),
    ("YL_YinYiZhiDi", "Glacial Abyss - Rainforest of Divine Legacy"),
    ("KD_WeiJiKuangDong", "Glacial Abyss - Swirling Mines"),
    ("YL_BeiFengLinDi", "Grimwind Woods"),
    ("SD_ZhongXiGaoQiang", "Glacial Abyss - Wall of the Last Breath"),
    ("SD_GeBuLinYingDi", "Glacial Abyss - Blustery Canyon"),
    ("YongShuangBingPo", "Glacial Abyss - Throne of Winter"),
    // Boss zones
    ("YJ_XiuShiShenYuan", "Rusted Abyss"),
    // Steel Forge
    ("JH_JueXingMiDian", "Steel Forge - Shrine of Despair"),
    ("JH_TongKuMiDian", "Steel Forge - Shrine of Punishment"),
    ("SD_YuanGuTongDao", "Steel Forge - Beast Plains"),
    ("SQ_JingJiHuiTu", "Steel Forge - Thorny Filth"),
    ("KD_AiRenDiErCeng", "Steel Forge - Weeping Mines"),
    ("SD_DuiLongJuQiang", "Steel Forge - Cloud Walls"),
    ("DD_YinYanJieXiang", "Steel Forge - Alleys of the Lost"),
    ("YJ_TaiYangWangTing", "Steel Forge - City of Eternal Fire"),
    ("DD_JueWangZhiQiang", "Steel Forge - Wall of the Pure"),
    ("YJ_RiXiShenMiao", "Steel Forge - Sun Temple"),
    ("YJ_YingLingShenDian", "Steel Forge - Corona Shrine"),
    ("SQ_ZheFengBiZhang", "Steel Forge - Windbreath Cliff"),
    ("ChiGuiWuShi", "Steel Forge - Imaginary Monument"),
    // Thunder Wastes
    ("DD_TanXiZhiQiang", "Thunder Wastes - Wall of Sorrows"),
    ("DD_XinTuJieXiang", "Thunder Wastes - Alleys of Pilgrims"),
    ("SQ_EWuHuangCun", "Thunder Wastes - Desolate Village"),
    ("YJ_ShuXiDaTing", "Thunder Wastes - Hall in the Mirror"),
    ("SQ_NvShenQunBai", "Thunder Wastes - Defiled Oasis"),
    ("SQ_XiongShiZhiXin", "Thunder Wastes - King's Hub"),
    ("KD_CangBaoDongKu", "Thunder Wastes - Thirsty Mines"),
    ("SD_ShengHuoLing", "Thunder Wastes - Rainmist Jungle"),
    ("JH_JiaoTangDaTing", "Thunder Wastes - Prayer Sanctuary"),
    ("DD_DiDuTingYuan000", "Thunder Wastes - Sacred Courtyard"),
    ("YJ_LiuJinJieQu", "Thunder Wastes - Gallery of Moon"),
    ("LeiYingJiDian", "Thunder Wastes - Summit of Thunder"),
    // Rift of Dimensions
    ("LieXiKongJing", "Rift of Dimensions"),
    // Secret Realms
    ("HD_YingGuangDianTang", "Secret Realm - Invaluable Time"),
    ("HD_EMengZhiXia", "Secret Realm - Sea of Rites"),
    ("BZ_NaGouZhiXi", "Secret Realm - Unholy Pedestal"),
    ("BZ_JiangShengChao", "Secret Realm - Abyssal Vault"),
    // League mechanic sub-zones
    ("SuMingTaLuo", "Fateful Contest"),
    ("WuDuYiZhi", "Mistville"),
    // Void Sea
    ("XuHaiZhongGang", "Void Sea Terminal"),
    // Voidlands
    ("DD_QunLangJieXiang", "Voidlands - Grim Alleys"),
    ("YL_MaNeiLaYuLin", "Voidlands - Filthy Forest"),
    ("YL_MiWuYuLin", "Voidlands - Dreamless Thicket"),
    ("JH_ShenHeJuSuo", "Voidlands - Luminescent Throne"),
    ("JH_YiWangMiDian", "Voidlands - Shrine of Agony"),
    ("YL_KuangReYuLin", "Voidlands - Shimmering Swamp"),
    ("YL_XiDiChongGu", "Voidlands - Jungle of the Brood"),
    ("YJ_YongZhouHuiLang", "Voidlands - Gallery of Stars"),
    ("JH_YinNiShengTang", "Voidlands - Yesterday Chamber"),
    ("DiaoLingWangYu", "Voidlands - Dreamless Abyss"),
];

/// Zones sharing a path across regions, resolved by `level_id % 100`.
const AMBIGUOUS_ZONES: &[(&str, &[(i64, &str)])] = &[
    (
        "YL_BeiFengLinDi",
        &[
            (6, "Glacial Abyss - Grimwind Woods"),
            (54, "Voidlands - Grimwind Woods"),
        ],
    ),
    (
        "KD_YuanSuKuangDong000",
        &[
            (12, "Blistering Lava Sea - Elemental Mine"),
            (55, "Voidlands - Elemental Mine"),
        ],
    ),
    ("GeBuLinCunLuo", &[(2, "Glacial Abyss - Demiman Village")]),
];

/// Exact LevelId names for zones outside the suffix pattern.
const LEVEL_ID_ZONES: &[(i64, &str)] = &[
    (3016, "Blistering Lava Sea - Hellfire Chasm"),
    (3006, "Glacial Abyss - Throne of Winter"),
    (3036, "Thunder Wastes - Summit of Thunder"),
    (3026, "Steel Forge - Imaginary Monument"),
    (3046, "Voidlands - Dreamless Abyss"),
    (234020, "Secret Realm - Sea of Rites"),
    (212023, "Trial of Divinity"),
    (999901, "Path of the Brave"),
    (999902, "Path of the Brave"),
    (999903, "Path of the Brave"),
    (999904, "Path of the Brave"),
    (999905, "Path of the Brave"),
];

pub fn is_hub_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    HUB_PATH_FRAGMENTS
        .iter()
        .any(|frag| lower.contains(&frag.to_ascii_lowercase()))
}

pub fn is_sub_zone_path(path: &str) -> bool {
    SUB_ZONE_PATH_FRAGMENTS.iter().any(|frag| path.contains(frag))
}

pub fn is_sub_zone_meta(level_type: Option<i64>, level_id: Option<i64>) -> bool {
    level_type.is_some_and(|t| SUB_ZONE_LEVEL_TYPES.contains(&t))
        || level_id.is_some_and(|i| SUB_ZONE_LEVEL_IDS.contains(&i))
}

/// English display name for a zone path, using the LevelId to break ties.
pub fn display_name(zone_path: &str, level_id: Option<i64>) -> String {
    if let Some(id) = level_id {
        if let Some((_, name)) = LEVEL_ID_ZONES.iter().find(|(zid, _)| *zid == id) {
            return (*name).to_string();
        }
        for (fragment, suffix_map) in AMBIGUOUS_ZONES {
            if zone_path.contains(fragment) {
                let suffix = id % 100;
                if let Some((_, name)) = suffix_map.iter().find(|(s, _)| *s == suffix) {
                    return (*name).to_string();
                }
            }
        }
    }

    for (fragment, name) in ZONE_NAMES {
        if zone_path.contains(fragment) {
            return (*name).to_string();
        }
    }

    // Fall back to the zone code token from the path, trailing digits removed.
    for part in zone_path.rsplit('/') {
        if part.is_empty() || part.starts_with("Game") || part.starts_with("Art") {
            continue;
        }
        let cleaned = part.trim_end_matches(|c: char| c.is_ascii_digit());
        if !cleaned.is_empty() {
            return cleaned.to_string();
        }
        return part.to_string();
    }
    zone_path.to_string()
}
