//! Adapter over the native client library, `libyottadb`.
//!
//! Both call sets are declared: the simple one (`ydb_*_s`, no tokens) and
//! the threaded one (`ydb_*_st`, explicit tokens). The process picks one
//! through [`env::select_api_mode`]; the library rejects mixing them.

use log::{debug, warn};
use std::any::Any;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint, c_ulonglong, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::engine::{Engine, EngineResult, Status, TpCallback};
use crate::env::{self, EngineConfig};
use crate::error::{IntoResult, Result};
use crate::key::Key;
use crate::types::{ApiMode, TpToken};

/// Counted byte buffer passed across the boundary
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct ydb_buffer_t {
    pub len_alloc: c_uint,
    pub len_used: c_uint,
    pub buf_addr: *mut c_char,
}

#[allow(non_camel_case_types)]
type ydb_tp2fnptr_t = Option<unsafe extern "C" fn(u64, *mut ydb_buffer_t, *mut c_void) -> c_int>;
#[allow(non_camel_case_types)]
type ydb_tpfnptr_t = Option<unsafe extern "C" fn(*mut c_void) -> c_int>;

#[link(name = "yottadb")]
extern "C" {
    fn ydb_get_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_set_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, value: *const ydb_buffer_t) -> c_int;
    fn ydb_delete_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, deltype: c_int) -> c_int;
    fn ydb_data_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut c_uint) -> c_int;
    fn ydb_incr_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, increment: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_subscript_next_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_subscript_previous_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_node_next_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_subs_used: *mut c_int, ret_subsarray: *mut ydb_buffer_t) -> c_int;
    fn ydb_node_previous_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_subs_used: *mut c_int, ret_subsarray: *mut ydb_buffer_t) -> c_int;
    fn ydb_lock_s(timeout_nsec: c_ulonglong, namecount: c_int, ...) -> c_int;
    fn ydb_lock_incr_s(timeout_nsec: c_ulonglong, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t) -> c_int;
    fn ydb_lock_decr_s(varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t) -> c_int;
    fn ydb_delete_excl_s(namecount: c_int, varnames: *const ydb_buffer_t) -> c_int;
    fn ydb_str2zwr_s(str: *const ydb_buffer_t, zwr: *mut ydb_buffer_t) -> c_int;
    fn ydb_zwr2str_s(zwr: *const ydb_buffer_t, str: *mut ydb_buffer_t) -> c_int;
    fn ydb_tp_s(tpfn: ydb_tpfnptr_t, tpfnparm: *mut c_void, transid: *const c_char, namecount: c_int, varnames: *const ydb_buffer_t) -> c_int;
    fn ydb_message(status: c_int, msg_buff: *mut ydb_buffer_t) -> c_int;

    fn ydb_get_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_set_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, value: *const ydb_buffer_t) -> c_int;
    fn ydb_delete_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, deltype: c_int) -> c_int;
    fn ydb_data_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut c_uint) -> c_int;
    fn ydb_incr_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, increment: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_subscript_next_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_subscript_previous_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_value: *mut ydb_buffer_t) -> c_int;
    fn ydb_node_next_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_subs_used: *mut c_int, ret_subsarray: *mut ydb_buffer_t) -> c_int;
    fn ydb_node_previous_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t, ret_subs_used: *mut c_int, ret_subsarray: *mut ydb_buffer_t) -> c_int;
    fn ydb_lock_st(tptoken: u64, errstr: *mut ydb_buffer_t, timeout_nsec: c_ulonglong, namecount: c_int, ...) -> c_int;
    fn ydb_lock_incr_st(tptoken: u64, errstr: *mut ydb_buffer_t, timeout_nsec: c_ulonglong, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t) -> c_int;
    fn ydb_lock_decr_st(tptoken: u64, errstr: *mut ydb_buffer_t, varname: *const ydb_buffer_t, subs_used: c_int, subsarray: *const ydb_buffer_t) -> c_int;
    fn ydb_delete_excl_st(tptoken: u64, errstr: *mut ydb_buffer_t, namecount: c_int, varnames: *const ydb_buffer_t) -> c_int;
    fn ydb_str2zwr_st(tptoken: u64, errstr: *mut ydb_buffer_t, str: *const ydb_buffer_t, zwr: *mut ydb_buffer_t) -> c_int;
    fn ydb_zwr2str_st(tptoken: u64, errstr: *mut ydb_buffer_t, zwr: *const ydb_buffer_t, str: *mut ydb_buffer_t) -> c_int;
    fn ydb_tp_st(tptoken: u64, errstr: *mut ydb_buffer_t, tpfn: ydb_tp2fnptr_t, tpfnparm: *mut c_void, transid: *const c_char, namecount: c_int, varnames: *const ydb_buffer_t) -> c_int;
    fn ydb_message_t(tptoken: u64, errstr: *mut ydb_buffer_t, status: c_int, msg_buff: *mut ydb_buffer_t) -> c_int;

    fn ydb_init() -> c_int;
    fn ydb_exit() -> c_int;
}

/// Starting size of value buffers; grown on INVSTRLEN
const INITIAL_VALUE_LEN: usize = 1024;
/// Starting size of each subscript buffer returned by node_next/previous
const INITIAL_SUB_LEN: usize = 64;

/// Read-only view of `bytes`. The engine never writes through input
/// buffers, so handing out a mutable pointer is sound.
fn input(bytes: &[u8]) -> ydb_buffer_t {
    ydb_buffer_t {
        len_alloc: bytes.len() as c_uint,
        len_used: bytes.len() as c_uint,
        buf_addr: bytes.as_ptr() as *mut c_char,
    }
}

fn output(data: &mut [u8]) -> ydb_buffer_t {
    ydb_buffer_t {
        len_alloc: data.len() as c_uint,
        len_used: 0,
        buf_addr: data.as_mut_ptr() as *mut c_char,
    }
}

/// A key marshalled into native buffers borrowing from the key
struct KeyArgs {
    varname: ydb_buffer_t,
    subs: Vec<ydb_buffer_t>,
}

impl KeyArgs {
    fn new(key: &Key) -> Self {
        KeyArgs {
            varname: input(key.name().as_bytes()),
            subs: key.subscripts().iter().map(|s| input(s)).collect(),
        }
    }

    fn varname(&self) -> *const ydb_buffer_t {
        &self.varname
    }

    fn count(&self) -> c_int {
        self.subs.len() as c_int
    }

    fn subs(&self) -> *const ydb_buffer_t {
        self.subs.as_ptr()
    }
}

/// Call `f` with a value buffer, growing it while the engine reports
/// INVSTRLEN (it stores the length it needs in `len_used`)
fn with_value_buffer(mut f: impl FnMut(*mut ydb_buffer_t) -> c_int) -> EngineResult<Vec<u8>> {
    let mut data = vec![0u8; INITIAL_VALUE_LEN];
    loop {
        let mut out = output(&mut data);
        let status = f(&mut out);
        if status == YDB_ERR_INVSTRLEN {
            let needed = (out.len_used as usize).max(data.len() * 2);
            data.resize(needed, 0);
            continue;
        }
        if status != YDB_OK {
            return Err(status);
        }
        data.truncate(out.len_used as usize);
        return Ok(data);
    }
}

/// Call `f` with an array of subscript buffers, growing the array on
/// INSUFFSUBS and the buffers on INVSTRLEN
fn with_subs_buffer(mut f: impl FnMut(*mut c_int, *mut ydb_buffer_t) -> c_int) -> EngineResult<Vec<Vec<u8>>> {
    let mut count = YDB_MAX_SUBS;
    let mut len = INITIAL_SUB_LEN;
    loop {
        let mut storage: Vec<Vec<u8>> = (0..count).map(|_| vec![0u8; len]).collect();
        let mut buffers: Vec<ydb_buffer_t> = storage.iter_mut().map(|d| output(d)).collect();
        let mut used = count as c_int;
        let status = f(&mut used, buffers.as_mut_ptr());
        match status {
            YDB_ERR_INSUFFSUBS => {
                count = (used as usize).max(count + 1);
            }
            YDB_ERR_INVSTRLEN => {
                let needed = buffers.iter().map(|b| b.len_used as usize).max().unwrap_or(0);
                len = needed.max(len * 2);
            }
            YDB_OK => {
                let used = used.max(0) as usize;
                return Ok(storage
                    .into_iter()
                    .zip(buffers.iter())
                    .take(used)
                    .map(|(mut data, buf)| {
                        data.truncate(buf.len_used as usize);
                        data
                    })
                    .collect());
            }
            status => return Err(status),
        }
    }
}

/// Everything the trampoline needs to reach the Rust callback
struct TpParam<'a, 'b> {
    callback: &'a mut TpCallback<'b>,
    panic: Option<Box<dyn Any + Send + 'static>>,
}

impl TpParam<'_, '_> {
    fn invoke(&mut self, token: TpToken) -> c_int {
        let callback = &mut *self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback(token))) {
            Ok(status) => status,
            Err(payload) => {
                // Unwinding through the engine's frames is not allowed
                self.panic = Some(payload);
                YDB_TP_ROLLBACK
            }
        }
    }
}

unsafe extern "C" fn tp_entry_st(tptoken: u64, _errstr: *mut ydb_buffer_t, param: *mut c_void) -> c_int {
    let param = &mut *(param as *mut TpParam<'_, '_>);
    param.invoke(TpToken(tptoken))
}

unsafe extern "C" fn tp_entry_s(param: *mut c_void) -> c_int {
    let param = &mut *(param as *mut TpParam<'_, '_>);
    param.invoke(TpToken::NOTTP)
}

/// The engine provided by `libyottadb`
#[derive(Debug)]
pub struct NativeEngine {
    mode: ApiMode,
}

impl NativeEngine {
    /// Select the configured call set for this process and initialise the
    /// library
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let mode = env::select_api_mode(config.api_mode)?;
        if config.max_restarts.is_some() {
            warn!("restart count limits are not enforced by libyottadb; use {}", env::MAXTPTIME_VAR);
        }
        unsafe { ydb_init() }.into_result()?;
        debug!("libyottadb initialised with the {} call set", mode);
        Ok(NativeEngine { mode })
    }

    pub fn mode(&self) -> ApiMode {
        self.mode
    }

    /// Detach this process from every database. Later calls fail with
    /// CALLINAFTERXIT.
    pub fn exit(&self) -> Result<()> {
        unsafe { ydb_exit() }.into_result()
    }

    fn threaded(&self) -> bool {
        self.mode == ApiMode::Threaded
    }
}

impl Engine for NativeEngine {
    fn get(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>> {
        let k = KeyArgs::new(key);
        with_value_buffer(|out| unsafe {
            if self.threaded() {
                ydb_get_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), out)
            } else {
                ydb_get_s(k.varname(), k.count(), k.subs(), out)
            }
        })
    }

    fn set(&self, tptoken: TpToken, key: &Key, value: &[u8]) -> EngineResult<()> {
        let k = KeyArgs::new(key);
        let value = input(value);
        let status = unsafe {
            if self.threaded() {
                ydb_set_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), &value)
            } else {
                ydb_set_s(k.varname(), k.count(), k.subs(), &value)
            }
        };
        status_result(status)
    }

    fn delete(&self, tptoken: TpToken, key: &Key, kind: DeleteType) -> EngineResult<()> {
        let k = KeyArgs::new(key);
        let status = unsafe {
            if self.threaded() {
                ydb_delete_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), kind.to_native())
            } else {
                ydb_delete_s(k.varname(), k.count(), k.subs(), kind.to_native())
            }
        };
        status_result(status)
    }

    fn data(&self, tptoken: TpToken, key: &Key) -> EngineResult<DataFlags> {
        let k = KeyArgs::new(key);
        let mut raw: c_uint = 0;
        let status = unsafe {
            if self.threaded() {
                ydb_data_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), &mut raw)
            } else {
                ydb_data_s(k.varname(), k.count(), k.subs(), &mut raw)
            }
        };
        status_result(status)?;
        DataFlags::from_native(raw).ok_or(YDB_NOTOK)
    }

    fn incr(&self, tptoken: TpToken, key: &Key, increment: &[u8]) -> EngineResult<Vec<u8>> {
        let k = KeyArgs::new(key);
        let increment = input(increment);
        with_value_buffer(|out| unsafe {
            if self.threaded() {
                ydb_incr_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), &increment, out)
            } else {
                ydb_incr_s(k.varname(), k.count(), k.subs(), &increment, out)
            }
        })
    }

    fn subscript_next(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>> {
        let k = KeyArgs::new(key);
        with_value_buffer(|out| unsafe {
            if self.threaded() {
                ydb_subscript_next_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), out)
            } else {
                ydb_subscript_next_s(k.varname(), k.count(), k.subs(), out)
            }
        })
    }

    fn subscript_previous(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>> {
        let k = KeyArgs::new(key);
        with_value_buffer(|out| unsafe {
            if self.threaded() {
                ydb_subscript_previous_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), out)
            } else {
                ydb_subscript_previous_s(k.varname(), k.count(), k.subs(), out)
            }
        })
    }

    fn node_next(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<Vec<u8>>> {
        let k = KeyArgs::new(key);
        with_subs_buffer(|used, subs| unsafe {
            if self.threaded() {
                ydb_node_next_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), used, subs)
            } else {
                ydb_node_next_s(k.varname(), k.count(), k.subs(), used, subs)
            }
        })
    }

    fn node_previous(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<Vec<u8>>> {
        let k = KeyArgs::new(key);
        with_subs_buffer(|used, subs| unsafe {
            if self.threaded() {
                ydb_node_previous_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs(), used, subs)
            } else {
                ydb_node_previous_s(k.varname(), k.count(), k.subs(), used, subs)
            }
        })
    }

    /// Release everything, then take each key with `lock_incr` inside the
    /// remaining time. A failure releases whatever was taken.
    fn lock(&self, tptoken: TpToken, timeout_ns: u64, keys: &[Key]) -> EngineResult<()> {
        let release_all = || unsafe {
            if self.threaded() {
                ydb_lock_st(tptoken.0, ptr::null_mut(), 0, 0)
            } else {
                ydb_lock_s(0, 0)
            }
        };
        status_result(release_all())?;
        let deadline = Instant::now() + Duration::from_nanos(timeout_ns);
        for key in keys {
            let remaining = deadline.saturating_duration_since(Instant::now()).as_nanos() as u64;
            if let Err(status) = self.lock_incr(tptoken, remaining, key) {
                release_all();
                return Err(status);
            }
        }
        Ok(())
    }

    fn lock_incr(&self, tptoken: TpToken, timeout_ns: u64, key: &Key) -> EngineResult<()> {
        let k = KeyArgs::new(key);
        let status = unsafe {
            if self.threaded() {
                ydb_lock_incr_st(tptoken.0, ptr::null_mut(), timeout_ns, k.varname(), k.count(), k.subs())
            } else {
                ydb_lock_incr_s(timeout_ns, k.varname(), k.count(), k.subs())
            }
        };
        status_result(status)
    }

    fn lock_decr(&self, tptoken: TpToken, key: &Key) -> EngineResult<()> {
        let k = KeyArgs::new(key);
        let status = unsafe {
            if self.threaded() {
                ydb_lock_decr_st(tptoken.0, ptr::null_mut(), k.varname(), k.count(), k.subs())
            } else {
                ydb_lock_decr_s(k.varname(), k.count(), k.subs())
            }
        };
        status_result(status)
    }

    fn delete_excl(&self, tptoken: TpToken, names: &[String]) -> EngineResult<()> {
        let names: Vec<ydb_buffer_t> = names.iter().map(|n| input(n.as_bytes())).collect();
        let status = unsafe {
            if self.threaded() {
                ydb_delete_excl_st(tptoken.0, ptr::null_mut(), names.len() as c_int, names.as_ptr())
            } else {
                ydb_delete_excl_s(names.len() as c_int, names.as_ptr())
            }
        };
        status_result(status)
    }

    fn str2zwr(&self, tptoken: TpToken, text: &[u8]) -> EngineResult<Vec<u8>> {
        let text = input(text);
        with_value_buffer(|out| unsafe {
            if self.threaded() {
                ydb_str2zwr_st(tptoken.0, ptr::null_mut(), &text, out)
            } else {
                ydb_str2zwr_s(&text, out)
            }
        })
    }

    fn zwr2str(&self, tptoken: TpToken, zwr: &[u8]) -> EngineResult<Vec<u8>> {
        let zwr = input(zwr);
        with_value_buffer(|out| unsafe {
            if self.threaded() {
                ydb_zwr2str_st(tptoken.0, ptr::null_mut(), &zwr, out)
            } else {
                ydb_zwr2str_s(&zwr, out)
            }
        })
    }

    fn tp(
        &self,
        tptoken: TpToken,
        transid: &str,
        varnames: &[String],
        callback: &mut TpCallback<'_>,
    ) -> Status {
        let transid = match CString::new(transid) {
            Ok(transid) => transid,
            Err(_) => return YDB_ERR_PARAMINVALID,
        };
        let names: Vec<ydb_buffer_t> = varnames.iter().map(|n| input(n.as_bytes())).collect();
        let mut param = TpParam {
            callback,
            panic: None,
        };
        let raw = &mut param as *mut TpParam<'_, '_> as *mut c_void;
        let status = unsafe {
            if self.threaded() {
                ydb_tp_st(
                    tptoken.0,
                    ptr::null_mut(),
                    Some(tp_entry_st),
                    raw,
                    transid.as_ptr(),
                    names.len() as c_int,
                    names.as_ptr(),
                )
            } else {
                ydb_tp_s(Some(tp_entry_s), raw, transid.as_ptr(), names.len() as c_int, names.as_ptr())
            }
        };
        if let Some(payload) = param.panic.take() {
            panic::resume_unwind(payload);
        }
        status
    }

    fn message(&self, tptoken: TpToken, status: Status) -> Option<String> {
        let mut data = vec![0u8; YDB_MAX_ERRORMSG];
        let mut out = output(&mut data);
        let rc = unsafe {
            if self.threaded() {
                ydb_message_t(tptoken.0, ptr::null_mut(), status, &mut out)
            } else {
                ydb_message(status, &mut out)
            }
        };
        if rc != YDB_OK {
            return None;
        }
        let len = (out.len_used as usize).min(data.len());
        Some(String::from_utf8_lossy(&data[..len]).into_owned())
    }
}

fn status_result(status: c_int) -> EngineResult<()> {
    if status == YDB_OK {
        Ok(())
    } else {
        Err(status)
    }
}
