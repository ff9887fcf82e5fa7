//! Сырые объявления ApplicationServices / CoreVideo / CoreGraphics

#![allow(non_upper_case_globals, non_snake_case, dead_code)]

use core_foundation::base::{CFTypeID, CFTypeRef};
use core_foundation::runloop::CFRunLoopSourceRef;
use core_foundation::string::CFStringRef;
use std::ffi::c_void;

pub type AXUIElementRef = CFTypeRef;
pub type AXObserverRef = CFTypeRef;
pub type AXValueRef = CFTypeRef;
pub type AXError = i32;

pub const kAXErrorSuccess: AXError = 0;
pub const kAXErrorCannotComplete: AXError = -25204;
pub const kAXErrorInvalidUIElement: AXError = -25202;

pub const kAXValueCGPointType: u32 = 1;
pub const kAXValueCGSizeType: u32 = 2;

pub type AXObserverCallback = unsafe extern "C" fn(
    observer: AXObserverRef,
    element: AXUIElementRef,
    notification: CFStringRef,
    refcon: *mut c_void,
);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CGPoint {
    pub x: f64,
    pub y: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CGSize {
    pub width: f64,
    pub height: f64,
}

#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    pub fn AXIsProcessTrusted() -> bool;
    pub fn AXUIElementGetTypeID() -> CFTypeID;
    pub fn AXValueGetTypeID() -> CFTypeID;

    pub fn AXUIElementCreateApplication(pid: libc::pid_t) -> AXUIElementRef;
    pub fn AXUIElementCopyAttributeValue(
        element: AXUIElementRef,
        attribute: CFStringRef,
        value: *mut CFTypeRef,
    ) -> AXError;
    pub fn AXUIElementSetAttributeValue(
        element: AXUIElementRef,
        attribute: CFStringRef,
        value: CFTypeRef,
    ) -> AXError;

    pub fn AXValueCreate(value_type: u32, value: *const c_void) -> AXValueRef;
    pub fn AXValueGetValue(value: AXValueRef, value_type: u32, out: *mut c_void) -> bool;

    pub fn AXObserverCreate(
        application: libc::pid_t,
        callback: AXObserverCallback,
        observer: *mut AXObserverRef,
    ) -> AXError;
    pub fn AXObserverAddNotification(
        observer: AXObserverRef,
        element: AXUIElementRef,
        notification: CFStringRef,
        refcon: *mut c_void,
    ) -> AXError;
    pub fn AXObserverRemoveNotification(
        observer: AXObserverRef,
        element: AXUIElementRef,
        notification: CFStringRef,
    ) -> AXError;
    pub fn AXObserverGetRunLoopSource(observer: AXObserverRef) -> CFRunLoopSourceRef;
}

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    pub fn CGMainDisplayID() -> u32;
}

pub type CVDisplayLinkRef = *mut c_void;
pub type CVReturn = i32;
pub type CVOptionFlags = u64;

/// Метка времени кадра; поля не разбираются
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CVTimeStamp {
    pub version: u32,
    pub video_time_scale: i32,
    pub video_time: i64,
    pub host_time: u64,
    pub rate_scalar: f64,
    pub video_refresh_period: i64,
    pub smpte_time: [u8; 24],
    pub flags: u64,
    pub reserved: u64,
}

pub type CVDisplayLinkOutputCallback = unsafe extern "C" fn(
    display_link: CVDisplayLinkRef,
    in_now: *const CVTimeStamp,
    in_output_time: *const CVTimeStamp,
    flags_in: CVOptionFlags,
    flags_out: *mut CVOptionFlags,
    context: *mut c_void,
) -> CVReturn;

#[link(name = "CoreVideo", kind = "framework")]
unsafe extern "C" {
    pub fn CVDisplayLinkCreateWithCGDisplay(display_id: u32, link: *mut CVDisplayLinkRef) -> CVReturn;
    pub fn CVDisplayLinkSetOutputCallback(
        link: CVDisplayLinkRef,
        callback: CVDisplayLinkOutputCallback,
        context: *mut c_void,
    ) -> CVReturn;
    pub fn CVDisplayLinkStart(link: CVDisplayLinkRef) -> CVReturn;
    pub fn CVDisplayLinkStop(link: CVDisplayLinkRef) -> CVReturn;
    pub fn CVDisplayLinkRelease(link: CVDisplayLinkRef);
}

// NSScreen и NSRunningApplication ищутся по имени через objc runtime
#[link(name = "AppKit", kind = "framework")]
unsafe extern "C" {}
