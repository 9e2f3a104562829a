use bitflags::bitflags;
use std::os::raw::c_int;

// Shape of a node as reported by `data`
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataFlags: u32 {
        const VALUE = 0x01;
        const TREE = 0x02;
        const VALUE_AND_TREE = Self::VALUE.bits() | Self::TREE.bits();
    }
}

impl DataFlags {
    /// Neither a value nor descendants
    pub const UNDEF: DataFlags = DataFlags::empty();

    /// Decode the native decimal encoding (0, 1, 10, 11)
    pub fn from_native(raw: u32) -> Option<Self> {
        match raw {
            YDB_DATA_UNDEF => Some(DataFlags::UNDEF),
            YDB_DATA_VALUE_NODESC => Some(DataFlags::VALUE),
            YDB_DATA_NOVALUE_DESC => Some(DataFlags::TREE),
            YDB_DATA_VALUE_DESC => Some(DataFlags::VALUE_AND_TREE),
            _ => None,
        }
    }

    /// Encode as the native decimal value
    pub fn to_native(self) -> u32 {
        let mut raw = 0;
        if self.contains(DataFlags::VALUE) {
            raw += YDB_DATA_VALUE_NODESC;
        }
        if self.contains(DataFlags::TREE) {
            raw += YDB_DATA_NOVALUE_DESC;
        }
        raw
    }

    pub fn has_value(self) -> bool {
        self.contains(DataFlags::VALUE)
    }

    pub fn has_tree(self) -> bool {
        self.contains(DataFlags::TREE)
    }
}

/// What a delete removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteType {
    /// Only the value at the node
    Node,
    /// The value and the whole subtree
    Tree,
}

impl DeleteType {
    pub fn to_native(self) -> c_int {
        match self {
            DeleteType::Node => YDB_DEL_NODE,
            DeleteType::Tree => YDB_DEL_TREE,
        }
    }
}

// Native data encodings
pub const YDB_DATA_UNDEF: u32 = 0;
pub const YDB_DATA_VALUE_NODESC: u32 = 1;
pub const YDB_DATA_NOVALUE_DESC: u32 = 10;
pub const YDB_DATA_VALUE_DESC: u32 = 11;

pub const YDB_DEL_TREE: c_int = 1;
pub const YDB_DEL_NODE: c_int = 2;

// Limits from libyottadb.h
/// Maximum length of a variable name, not counting the leading `^`
pub const YDB_MAX_IDENT: usize = 31;
/// Maximum number of names in one lock or restart-variable list
pub const YDB_MAX_NAMES: usize = 35;
/// Maximum length of a value or subscript
pub const YDB_MAX_STR: usize = 1024 * 1024;
/// Maximum number of subscripts in a key
pub const YDB_MAX_SUBS: usize = 31;
/// Maximum lock timeout
pub const YDB_MAX_TIME_NSEC: u64 = 2_147_483_647 * 1_000_000;
/// Maximum length of a formatted error message
pub const YDB_MAX_ERRORMSG: usize = 1024;
/// Maximum number of simultaneously held lock names
pub const YDB_MAX_LOCKS: usize = 1024;
/// Maximum transaction nesting depth
pub const YDB_MAX_TP_DEPTH: usize = 126;
/// Significant digits kept by numeric operations
pub const YDB_NUMERIC_PRECISION: usize = 18;
/// Numbers at or above 10^47 in magnitude overflow
pub const YDB_NUMERIC_MAX_EXP: i32 = 47;

// Status codes
pub const YDB_OK: c_int = 0;
pub const YDB_INT_MAX: c_int = 0x7fff_ffff;
pub const YDB_TP_RESTART: c_int = YDB_INT_MAX - 1;
pub const YDB_TP_ROLLBACK: c_int = YDB_INT_MAX - 2;
pub const YDB_NOTOK: c_int = YDB_INT_MAX - 3;
pub const YDB_LOCK_TIMEOUT: c_int = YDB_INT_MAX - 4;
pub const YDB_DEFER_HANDLER: c_int = YDB_INT_MAX - 5;

/// Token meaning "no transaction in progress"
pub const YDB_NOTTP: u64 = 0;

/// Transaction id that does not force a journal flush on commit
pub const YDB_TRANSID_BATCH: &str = "BATCH";

// Error codes from libydberrors.h
pub const YDB_ERR_GVUNDEF: c_int = -150_372_994;
pub const YDB_ERR_MAXNRSUBSCRIPTS: c_int = -150_373_282;
pub const YDB_ERR_NUMOFLOW: c_int = -150_373_506;
pub const YDB_ERR_LVUNDEF: c_int = -150_373_850;
pub const YDB_ERR_MAXSTRLEN: c_int = -150_375_346;
pub const YDB_ERR_INVSTRLEN: c_int = -150_375_522;
pub const YDB_ERR_TPRETRY: c_int = -150_376_338;
pub const YDB_ERR_TPRESTART: c_int = -150_376_658;
pub const YDB_ERR_TPTOODEEP: c_int = -150_376_818;
pub const YDB_ERR_TPTIMEOUT: c_int = -150_377_322;
pub const YDB_ERR_INVZWRITECHAR: c_int = -150_380_098;
pub const YDB_ERR_INVVARNAME: c_int = -151_027_754;
pub const YDB_ERR_PARAMINVALID: c_int = -151_027_762;
pub const YDB_ERR_INSUFFSUBS: c_int = -151_027_770;
pub const YDB_ERR_NAMECOUNT2HI: c_int = -151_027_802;
pub const YDB_ERR_TIME2LONG: c_int = -151_027_826;
pub const YDB_ERR_VARNAME2LONG: c_int = -151_027_834;
pub const YDB_ERR_SIMPLEAPINEST: c_int = -151_027_842;
pub const YDB_ERR_NODEEND: c_int = -151_027_922;
pub const YDB_ERR_INVTPTRANS: c_int = -151_027_938;
pub const YDB_ERR_THREADEDAPINOTALLOWED: c_int = -151_027_946;
pub const YDB_ERR_SIMPLEAPINOTALLOWED: c_int = -151_027_954;
pub const YDB_ERR_CALLINAFTERXIT: c_int = -151_028_034;
pub const YDB_ERR_TPCALLBACKINVRETVAL: c_int = -151_028_066;
pub const YDB_ERR_LOCKSUB2LONG: c_int = -151_028_074;
