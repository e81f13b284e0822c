//! Windows SChannel 安全提供者。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 通过 SSPI 复用系统证书存储、吊销检查与协议实现，不引入额外 TLS 库；
//! - 所有 `unsafe` 调用集中在本模块，对外只暴露 [`SecurityProvider`]/[`SecurityContext`] 的安全接口。
//!
//! ## 核心逻辑（How）
//! - 凭据：Windows 10 1809（build 17763）及更新版本使用 `SCH_CREDENTIALS`，以“禁用列表”表达协议版本；
//!   更早版本使用 `SCHANNEL_CRED`，以“启用列表”表达且不含 TLS 1.3；
//! - 握手：`InitializeSecurityContextW` 输出令牌由系统分配，拷贝后立即 `FreeContextBuffer`；
//! - 记录：`EncryptMessage`/`DecryptMessage` 在调用方缓冲上原地操作，区间通过指针差换算为偏移。
//!
//! ## 风险与权衡（Trade-offs）
//! - 版本探测使用 `ntdll!RtlGetVersion`，不受应用清单兼容性垫片影响；
//! - 状态码与标志位在本地声明，避免依赖 `windows-sys` 不同版本间常量所在模块的变动。

use std::{ffi::c_void, mem, ptr, sync::OnceLock};

use windows_sys::Win32::{
    Security::{
        Authentication::Identity::{
            AcquireCredentialsHandleW, DecryptMessage, DeleteSecurityContext, EncryptMessage,
            FreeContextBuffer, FreeCredentialsHandle, InitializeSecurityContextW,
            QueryContextAttributesW, QuerySecurityPackageInfoW, SCH_CREDENTIALS, SCHANNEL_CRED,
            SecBuffer, SecBufferDesc, SecPkgContext_StreamSizes, SecPkgInfoW, TLS_PARAMETERS,
        },
        Credentials::SecHandle,
    },
    System::{
        LibraryLoader::{GetModuleHandleW, GetProcAddress},
        SystemInformation::OSVERSIONINFOW,
    },
};

use crate::{
    config::CredentialPolicy,
    provider::{
        ContextAttributes, DecryptStatus, NegotiationStatus, NegotiationStep, ProviderStatus,
        SealedLengths, SecurityContext, SecurityProvider, StreamSizes,
    },
};

const UNISP_NAME: &str = "Microsoft Unified Security Protocol Provider";

const SEC_E_OK: i32 = 0;
const SEC_I_CONTINUE_NEEDED: i32 = 0x0009_0312;
const SEC_I_CONTEXT_EXPIRED: i32 = 0x0009_0317;
const SEC_I_RENEGOTIATE: i32 = 0x0009_0321;
const SEC_E_INCOMPLETE_MESSAGE: i32 = 0x8009_0318_u32 as i32;
const SEC_E_INTERNAL_ERROR: i32 = 0x8009_0304_u32 as i32;

const SECPKG_CRED_OUTBOUND: u32 = 2;
const SECPKG_ATTR_STREAM_SIZES: u32 = 4;

const SECBUFFER_VERSION: u32 = 0;
const SECBUFFER_EMPTY: u32 = 0;
const SECBUFFER_DATA: u32 = 1;
const SECBUFFER_TOKEN: u32 = 2;
const SECBUFFER_EXTRA: u32 = 5;
const SECBUFFER_STREAM_TRAILER: u32 = 6;
const SECBUFFER_STREAM_HEADER: u32 = 7;

const ISC_REQ_REPLAY_DETECT: u32 = 0x0000_0004;
const ISC_REQ_SEQUENCE_DETECT: u32 = 0x0000_0008;
const ISC_REQ_CONFIDENTIALITY: u32 = 0x0000_0010;
const ISC_REQ_ALLOCATE_MEMORY: u32 = 0x0000_0100;
const ISC_REQ_EXTENDED_ERROR: u32 = 0x0000_4000;
const ISC_REQ_STREAM: u32 = 0x0000_8000;
const ISC_REQ_INTEGRITY: u32 = 0x0001_0000;

const ISC_RET_REPLAY_DETECT: u32 = ISC_REQ_REPLAY_DETECT;
const ISC_RET_SEQUENCE_DETECT: u32 = ISC_REQ_SEQUENCE_DETECT;
const ISC_RET_CONFIDENTIALITY: u32 = ISC_REQ_CONFIDENTIALITY;
const ISC_RET_INTEGRITY: u32 = ISC_REQ_INTEGRITY;

const REQUEST_FLAGS: u32 = ISC_REQ_REPLAY_DETECT
    | ISC_REQ_SEQUENCE_DETECT
    | ISC_REQ_CONFIDENTIALITY
    | ISC_REQ_ALLOCATE_MEMORY
    | ISC_REQ_EXTENDED_ERROR
    | ISC_REQ_STREAM
    | ISC_REQ_INTEGRITY;

const SCHANNEL_CRED_VERSION: u32 = 4;
const SCH_CREDENTIALS_VERSION: u32 = 5;
const SCH_CRED_MANUAL_CRED_VALIDATION: u32 = 0x0000_0008;
const SCH_CRED_NO_DEFAULT_CREDS: u32 = 0x0000_0010;
const SCH_CRED_AUTO_CRED_VALIDATION: u32 = 0x0000_0020;
const SCH_CRED_REVOCATION_CHECK_CHAIN: u32 = 0x0000_0200;
const SCH_USE_STRONG_CRYPTO: u32 = 0x0040_0000;

const SP_PROT_TLS1_0_CLIENT: u32 = 0x0000_0080;
const SP_PROT_TLS1_1_CLIENT: u32 = 0x0000_0200;
const SP_PROT_TLS1_2_CLIENT: u32 = 0x0000_0800;
const SP_PROT_TLS1_3_CLIENT: u32 = 0x0000_2000;
const SP_PROT_ALL_CLIENT: u32 =
    SP_PROT_TLS1_0_CLIENT | SP_PROT_TLS1_1_CLIENT | SP_PROT_TLS1_2_CLIENT | SP_PROT_TLS1_3_CLIENT;

/// `SCH_CREDENTIALS` 自 Windows 10 1809 起可用。
const SCH_CREDENTIALS_MIN_BUILD: u32 = 17763;

type RtlGetVersionFn = unsafe extern "system" fn(*mut OSVERSIONINFOW) -> i32;

/// 基于 SChannel 的系统安全提供者。
#[derive(Clone, Copy, Debug, Default)]
pub struct SchannelProvider;

impl SchannelProvider {
    pub fn new() -> Self {
        Self
    }
}

/// SChannel 凭据句柄，`Drop` 时释放。
pub struct SchannelCredentials {
    handle: SecHandle,
}

impl Drop for SchannelCredentials {
    fn drop(&mut self) {
        // SAFETY: 句柄由 AcquireCredentialsHandleW 成功返回，且只释放一次。
        unsafe {
            FreeCredentialsHandle(&self.handle);
        }
    }
}

/// SChannel 安全上下文句柄，`Drop` 时释放。
pub struct SchannelContext {
    handle: SecHandle,
    flags: u32,
}

impl Drop for SchannelContext {
    fn drop(&mut self) {
        // SAFETY: 句柄由 InitializeSecurityContextW 创建，且只删除一次。
        unsafe {
            DeleteSecurityContext(&self.handle);
        }
    }
}

fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn empty_buffer() -> SecBuffer {
    SecBuffer {
        cbBuffer: 0,
        BufferType: SECBUFFER_EMPTY,
        pvBuffer: ptr::null_mut(),
    }
}

/// 主/次/构建号，查询失败时返回 `None`。
fn windows_version() -> Option<(u32, u32, u32)> {
    static VERSION: OnceLock<Option<(u32, u32, u32)>> = OnceLock::new();
    *VERSION.get_or_init(|| {
        let module_name = wide("ntdll.dll");
        // SAFETY: ntdll 始终映射在进程中；函数指针签名与 RtlGetVersion 一致。
        unsafe {
            let module = GetModuleHandleW(module_name.as_ptr());
            if module.is_null() {
                return None;
            }
            let proc = GetProcAddress(module, b"RtlGetVersion\0".as_ptr())?;
            let rtl_get_version: RtlGetVersionFn = mem::transmute(proc);
            let mut info: OSVERSIONINFOW = mem::zeroed();
            info.dwOSVersionInfoSize = mem::size_of::<OSVERSIONINFOW>() as u32;
            if rtl_get_version(&mut info) != 0 {
                return None;
            }
            Some((info.dwMajorVersion, info.dwMinorVersion, info.dwBuildNumber))
        }
    })
}

fn supports_sch_credentials() -> bool {
    match windows_version() {
        Some((major, minor, build)) => {
            major > 10 || (major == 10 && (minor > 0 || build >= SCH_CREDENTIALS_MIN_BUILD))
        }
        None => false,
    }
}

fn credential_flags(policy: &CredentialPolicy) -> u32 {
    let mut flags = SCH_CRED_NO_DEFAULT_CREDS;
    flags |= if policy.validate_server {
        SCH_CRED_AUTO_CRED_VALIDATION
    } else {
        SCH_CRED_MANUAL_CRED_VALIDATION
    };
    if policy.revocation_check {
        flags |= SCH_CRED_REVOCATION_CHECK_CHAIN;
    }
    if policy.strong_crypto {
        flags |= SCH_USE_STRONG_CRYPTO;
    }
    flags
}

fn enabled_protocols(policy: &CredentialPolicy) -> u32 {
    let versions = policy.protocols;
    let mut mask = 0;
    if versions.tls1_0 {
        mask |= SP_PROT_TLS1_0_CLIENT;
    }
    if versions.tls1_1 {
        mask |= SP_PROT_TLS1_1_CLIENT;
    }
    if versions.tls1_2 {
        mask |= SP_PROT_TLS1_2_CLIENT;
    }
    if versions.tls1_3 {
        mask |= SP_PROT_TLS1_3_CLIENT;
    }
    mask
}

impl SecurityProvider for SchannelProvider {
    type Credentials = SchannelCredentials;
    type Context = SchannelContext;

    fn name(&self) -> &'static str {
        "schannel"
    }

    fn is_available(&self) -> bool {
        static AVAILABLE: OnceLock<bool> = OnceLock::new();
        *AVAILABLE.get_or_init(|| {
            let package = wide(UNISP_NAME);
            let mut info: *mut SecPkgInfoW = ptr::null_mut();
            // SAFETY: 输出指针由系统分配，成功后以 FreeContextBuffer 释放。
            unsafe {
                let status = QuerySecurityPackageInfoW(package.as_ptr(), &mut info);
                if !info.is_null() {
                    FreeContextBuffer(info.cast::<c_void>());
                }
                status == SEC_E_OK
            }
        })
    }

    fn acquire_credentials(&self, policy: &CredentialPolicy) -> Result<SchannelCredentials, ProviderStatus> {
        let package = wide(UNISP_NAME);
        let flags = credential_flags(policy);
        let enabled = enabled_protocols(policy);
        let modern = supports_sch_credentials();
        let mut handle = SecHandle {
            dwLower: 0,
            dwUpper: 0,
        };
        // SAFETY: 结构体全部由整数与空指针组成，零值合法；`auth_data` 在调用期间保持存活。
        let status = unsafe {
            if modern {
                let mut tls_parameters: TLS_PARAMETERS = mem::zeroed();
                tls_parameters.grbitDisabledProtocols = SP_PROT_ALL_CLIENT & !enabled;
                let mut auth_data: SCH_CREDENTIALS = mem::zeroed();
                auth_data.dwVersion = SCH_CREDENTIALS_VERSION;
                auth_data.dwFlags = flags;
                auth_data.cTlsParameters = 1;
                auth_data.pTlsParameters = &mut tls_parameters;
                AcquireCredentialsHandleW(
                    ptr::null(),
                    package.as_ptr(),
                    SECPKG_CRED_OUTBOUND as _,
                    ptr::null(),
                    (&auth_data as *const SCH_CREDENTIALS).cast::<c_void>(),
                    None,
                    ptr::null(),
                    &mut handle,
                    ptr::null_mut(),
                )
            } else {
                let mut auth_data: SCHANNEL_CRED = mem::zeroed();
                auth_data.dwVersion = SCHANNEL_CRED_VERSION;
                auth_data.dwFlags = flags;
                auth_data.grbitEnabledProtocols = enabled & !SP_PROT_TLS1_3_CLIENT;
                AcquireCredentialsHandleW(
                    ptr::null(),
                    package.as_ptr(),
                    SECPKG_CRED_OUTBOUND as _,
                    ptr::null(),
                    (&auth_data as *const SCHANNEL_CRED).cast::<c_void>(),
                    None,
                    ptr::null(),
                    &mut handle,
                    ptr::null_mut(),
                )
            }
        };
        tracing::debug!(modern, flags, enabled, status, "schannel credentials requested");
        if status != SEC_E_OK {
            return Err(ProviderStatus(status));
        }
        Ok(SchannelCredentials { handle })
    }

    fn initialize(
        &self,
        credentials: &mut SchannelCredentials,
        context: &mut Option<SchannelContext>,
        target: &str,
        input: &[u8],
    ) -> NegotiationStep {
        let target = wide(target);
        let mut input_copy = input.to_vec();
        let mut in_buffers = [
            SecBuffer {
                cbBuffer: input_copy.len() as u32,
                BufferType: SECBUFFER_TOKEN,
                pvBuffer: input_copy.as_mut_ptr().cast::<c_void>(),
            },
            empty_buffer(),
        ];
        let in_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: in_buffers.len() as u32,
            pBuffers: in_buffers.as_mut_ptr(),
        };
        let mut out_buffers = [SecBuffer {
            cbBuffer: 0,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: ptr::null_mut(),
        }];
        let mut out_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: out_buffers.len() as u32,
            pBuffers: out_buffers.as_mut_ptr(),
        };
        let mut new_handle = SecHandle {
            dwLower: 0,
            dwUpper: 0,
        };
        let mut attributes = 0u32;
        let existing: *const SecHandle = context
            .as_ref()
            .map_or(ptr::null(), |ctx| &ctx.handle as *const SecHandle);
        let new_handle_ptr: *mut SecHandle = if context.is_none() {
            &mut new_handle
        } else {
            ptr::null_mut()
        };
        let input_desc: *const SecBufferDesc = if input.is_empty() { ptr::null() } else { &in_desc };

        // SAFETY: 所有缓冲在调用期间存活；输出令牌由系统分配，随后释放。
        let status = unsafe {
            InitializeSecurityContextW(
                &credentials.handle,
                existing,
                target.as_ptr(),
                REQUEST_FLAGS as _,
                0,
                0,
                input_desc,
                0,
                new_handle_ptr,
                &mut out_desc,
                &mut attributes,
                ptr::null_mut(),
            )
        };

        let mut token = Vec::new();
        let out = out_buffers[0];
        if !out.pvBuffer.is_null() {
            // SAFETY: 系统保证 pvBuffer 指向 cbBuffer 字节，拷贝后立即释放。
            unsafe {
                token.extend_from_slice(std::slice::from_raw_parts(
                    out.pvBuffer.cast::<u8>(),
                    out.cbBuffer as usize,
                ));
                FreeContextBuffer(out.pvBuffer);
            }
        }

        match context.as_mut() {
            Some(ctx) => ctx.flags = attributes,
            None if status >= 0 => {
                *context = Some(SchannelContext {
                    handle: new_handle,
                    flags: attributes,
                });
            }
            None => {}
        }

        let extra = if in_buffers[1].BufferType == SECBUFFER_EXTRA {
            (in_buffers[1].cbBuffer as usize).min(input.len())
        } else {
            0
        };
        let status = match status {
            SEC_E_OK => NegotiationStatus::Complete,
            SEC_I_CONTINUE_NEEDED => NegotiationStatus::ContinueNeeded,
            SEC_E_INCOMPLETE_MESSAGE => {
                return NegotiationStep::new(NegotiationStatus::IncompleteMessage, Vec::new(), input.len());
            }
            other => NegotiationStatus::Failed(ProviderStatus(other)),
        };
        NegotiationStep::new(status, token, extra)
    }
}

impl SecurityContext for SchannelContext {
    fn attributes(&self) -> ContextAttributes {
        // 流模式下 SChannel 以序列/重放检测标志表达记录完整性。
        ContextAttributes {
            confidentiality: self.flags & ISC_RET_CONFIDENTIALITY != 0,
            integrity: self.flags & (ISC_RET_INTEGRITY | ISC_RET_SEQUENCE_DETECT | ISC_RET_REPLAY_DETECT)
                != 0,
        }
    }

    fn stream_sizes(&self) -> Result<StreamSizes, ProviderStatus> {
        let mut sizes: SecPkgContext_StreamSizes = SecPkgContext_StreamSizes {
            cbHeader: 0,
            cbTrailer: 0,
            cbMaximumMessage: 0,
            cBuffers: 0,
            cbBlockSize: 0,
        };
        // SAFETY: 输出结构体由调用方持有，大小与属性类型匹配。
        let status = unsafe {
            QueryContextAttributesW(
                &self.handle,
                SECPKG_ATTR_STREAM_SIZES as _,
                (&mut sizes as *mut SecPkgContext_StreamSizes).cast::<c_void>(),
            )
        };
        if status != SEC_E_OK {
            return Err(ProviderStatus(status));
        }
        Ok(StreamSizes {
            header: sizes.cbHeader as usize,
            trailer: sizes.cbTrailer as usize,
            max_message: sizes.cbMaximumMessage as usize,
        })
    }

    fn encrypt(
        &mut self,
        record: &mut [u8],
        sizes: &StreamSizes,
        payload_len: usize,
    ) -> Result<SealedLengths, ProviderStatus> {
        let total = sizes.header + payload_len + sizes.trailer;
        if record.len() < total {
            return Err(ProviderStatus(SEC_E_INTERNAL_ERROR));
        }
        let base = record.as_mut_ptr();
        // SAFETY: 三段区间均位于 `record` 内且互不重叠。
        let mut buffers = unsafe {
            [
                SecBuffer {
                    cbBuffer: sizes.header as u32,
                    BufferType: SECBUFFER_STREAM_HEADER,
                    pvBuffer: base.cast::<c_void>(),
                },
                SecBuffer {
                    cbBuffer: payload_len as u32,
                    BufferType: SECBUFFER_DATA,
                    pvBuffer: base.add(sizes.header).cast::<c_void>(),
                },
                SecBuffer {
                    cbBuffer: sizes.trailer as u32,
                    BufferType: SECBUFFER_STREAM_TRAILER,
                    pvBuffer: base.add(sizes.header + payload_len).cast::<c_void>(),
                },
                empty_buffer(),
            ]
        };
        let desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: buffers.len() as u32,
            pBuffers: buffers.as_mut_ptr(),
        };
        // SAFETY: `desc` 指向的缓冲在调用期间存活。
        let status = unsafe { EncryptMessage(&self.handle, 0, &desc, 0) };
        if status != SEC_E_OK {
            return Err(ProviderStatus(status));
        }
        Ok(SealedLengths {
            header: buffers[0].cbBuffer as usize,
            data: buffers[1].cbBuffer as usize,
            trailer: buffers[2].cbBuffer as usize,
        })
    }

    fn decrypt(&mut self, buffer: &mut [u8]) -> DecryptStatus {
        let base = buffer.as_mut_ptr();
        let mut buffers = [
            SecBuffer {
                cbBuffer: buffer.len() as u32,
                BufferType: SECBUFFER_DATA,
                pvBuffer: base.cast::<c_void>(),
            },
            empty_buffer(),
            empty_buffer(),
            empty_buffer(),
        ];
        let desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: buffers.len() as u32,
            pBuffers: buffers.as_mut_ptr(),
        };
        // SAFETY: 系统在 `buffer` 上原地解密，返回的区间指针均位于其内。
        let status = unsafe { DecryptMessage(&self.handle, &desc, 0, ptr::null_mut()) };
        match status {
            SEC_E_OK => {}
            SEC_E_INCOMPLETE_MESSAGE => return DecryptStatus::IncompleteMessage,
            SEC_I_CONTEXT_EXPIRED => return DecryptStatus::ContextExpired,
            SEC_I_RENEGOTIATE => return DecryptStatus::Renegotiate,
            other => return DecryptStatus::Failed(ProviderStatus(other)),
        }
        let mut data = 0..0;
        let mut extra = 0;
        for region in &buffers {
            match region.BufferType {
                SECBUFFER_DATA if !region.pvBuffer.is_null() => {
                    let offset = region.pvBuffer as usize - base as usize;
                    data = offset..offset + region.cbBuffer as usize;
                }
                SECBUFFER_EXTRA => extra = region.cbBuffer as usize,
                _ => {}
            }
        }
        DecryptStatus::Data { data, extra }
    }
}
